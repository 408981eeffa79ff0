//! ExternalProgramFilter: hand the ions to a shell command.
//!
//! Each input ion stream is written as a text file into the working
//! directory. In the command line `%i` expands to the space-separated input
//! file names and `%o` to the output file. When an output file is set, the
//! ions it contains after the command exits become a new ion stream.
//!
//! Running arbitrary commands makes this filter hazardous: it is never used
//! as a default template and is offered for removal when loading a state
//! file from an untrusted source.

use crate::pipeline::context::ExecutionContext;
use crate::pipeline::error::{ErrorCode, RefreshError};
use crate::pipeline::filter::{Filter, FilterBase};
use crate::pipeline::filter_type::FilterType;
use crate::pipeline::filters::text_io::{read_ions, write_ions, TextIonError};
use crate::pipeline::property::{
    expect_bool, expect_str, update, FilterProperty, PropertyEffect, PropertyError,
    PropertyValue,
};
use crate::pipeline::state::{FilterState, StateError};
use crate::pipeline::stream::{
    ion_streams, propagate_streams, IonStream, Stream, StreamMask, StreamRef,
};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::time::Duration;

pub const EXT_ERR_SPAWN: ErrorCode = 1;
pub const EXT_ERR_COMMAND_FAILED: ErrorCode = 2;
pub const EXT_ERR_WRITE: ErrorCode = 3;
pub const EXT_ERR_READ_OUTPUT: ErrorCode = 4;
pub const EXT_ERR_NO_COMMAND: ErrorCode = 5;

const WAIT_POLL: Duration = Duration::from_millis(20);

#[derive(Debug)]
pub struct ExternalProgramFilter {
    base: FilterBase,
    command: String,
    working_dir: PathBuf,
    output_file: String,
    block_input_ions: bool,
    clean_up: bool,
}

impl ExternalProgramFilter {
    pub fn new() -> Self {
        Self {
            base: FilterBase::new(FilterType::ExternalProgram.display_name()),
            command: String::new(),
            working_dir: PathBuf::from("."),
            output_file: String::new(),
            block_input_ions: false,
            clean_up: true,
        }
    }

    pub fn with_command(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::new()
        }
    }

    fn write_inputs(&mut self, input: &[StreamRef]) -> Result<Vec<PathBuf>, RefreshError> {
        let mut paths = Vec::new();
        for (k, ions) in ion_streams(input).enumerate() {
            let path = self
                .working_dir
                .join(format!("ionflow_input_{}_{k}.txt", std::process::id()));
            if let Err(e) = write_ions(&path, &ions.hits) {
                self.base
                    .console_message(format!("Unable to write {}: {e}", path.display()));
                return Err(RefreshError::Filter(EXT_ERR_WRITE));
            }
            paths.push(path);
        }
        Ok(paths)
    }

    fn expand_command(&self, inputs: &[PathBuf]) -> String {
        let names: Vec<String> = inputs
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        self.command
            .replace("%i", &names.join(" "))
            .replace("%o", &self.output_file)
    }

    fn spawn(&self, command_line: &str) -> std::io::Result<Child> {
        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(command_line);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(command_line);
            c
        };
        cmd.current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
    }

    /// Wait for `child`, killing it if the refresh is aborted.
    fn wait(child: &mut Child, ctx: &ExecutionContext) -> Result<ExitStatus, RefreshError> {
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(_) => return Err(RefreshError::Filter(EXT_ERR_COMMAND_FAILED)),
            }
            if ctx.abort_requested() {
                let _ = child.kill();
                let _ = child.wait();
                return Err(RefreshError::Abort);
            }
            std::thread::sleep(WAIT_POLL);
        }
    }

    fn run(
        &mut self,
        inputs: &[PathBuf],
        output: &mut Vec<StreamRef>,
        ctx: &ExecutionContext,
    ) -> Result<(), RefreshError> {
        let command_line = self.expand_command(inputs);
        tracing::info!("{}: running '{}'", self.base.label(), command_line);

        // A leftover output from an earlier run must not be read back
        if !self.output_file.is_empty() {
            let out_path = self.working_dir.join(&self.output_file);
            match std::fs::remove_file(&out_path) {
                Ok(()) => tracing::debug!("Removed stale output {}", out_path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    self.base
                        .console_message(format!("Unable to remove {}: {e}", out_path.display()));
                    return Err(RefreshError::Filter(EXT_ERR_WRITE));
                }
            }
        }

        ctx.progress().set_step(2, 3, "Running");
        let mut child = match self.spawn(&command_line) {
            Ok(child) => child,
            Err(e) => {
                self.base
                    .console_message(format!("Unable to start '{command_line}': {e}"));
                return Err(RefreshError::Filter(EXT_ERR_SPAWN));
            }
        };
        let status = Self::wait(&mut child, ctx)?;
        if !status.success() {
            self.base
                .console_message(format!("'{command_line}' exited with {status}"));
            return Err(RefreshError::Filter(EXT_ERR_COMMAND_FAILED));
        }

        if self.output_file.is_empty() {
            return Ok(());
        }
        ctx.progress().set_step(3, 3, "Reading output");
        let out_path = self.working_dir.join(&self.output_file);
        let hits = match read_ions(&out_path, ctx) {
            Ok(hits) => hits,
            Err(TextIonError::Abort) => return Err(RefreshError::Abort),
            Err(e) => {
                self.base
                    .console_message(format!("{}: {e}", out_path.display()));
                return Err(RefreshError::Filter(EXT_ERR_READ_OUTPUT));
            }
        };
        let n = hits.len();
        let stream = Stream::ions(
            self.base.id(),
            IonStream {
                hits,
                value_label: "External output".to_string(),
                ..Default::default()
            },
        );
        let stream = self.cache_as_needed(stream, n, ctx);
        output.push(stream);
        Ok(())
    }
}

impl Default for ExternalProgramFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl Filter for ExternalProgramFilter {
    fn filter_type(&self) -> Option<FilterType> {
        Some(FilterType::ExternalProgram)
    }

    fn type_name(&self) -> &'static str {
        FilterType::ExternalProgram.display_name()
    }

    fn base(&self) -> &FilterBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut FilterBase {
        &mut self.base
    }

    fn clone_config(&self) -> Box<dyn Filter> {
        Box::new(Self {
            base: self.base.clone_config(),
            command: self.command.clone(),
            working_dir: self.working_dir.clone(),
            output_file: self.output_file.clone(),
            block_input_ions: self.block_input_ions,
            clean_up: self.clean_up,
        })
    }

    fn refresh(
        &mut self,
        input: &[StreamRef],
        output: &mut Vec<StreamRef>,
        ctx: &ExecutionContext,
    ) -> Result<(), RefreshError> {
        if self.command.trim().is_empty() {
            return Err(RefreshError::Filter(EXT_ERR_NO_COMMAND));
        }
        propagate_streams(input, output, self.block_mask(), true);

        ctx.progress().set_step(1, 3, "Writing input");
        let inputs = self.write_inputs(input)?;
        let result = self.run(&inputs, output, ctx);
        if self.clean_up {
            for path in &inputs {
                if let Err(e) = std::fs::remove_file(path) {
                    tracing::debug!("Could not remove {}: {}", path.display(), e);
                }
            }
        }
        result
    }

    fn properties(&self) -> Vec<FilterProperty> {
        vec![
            FilterProperty::new(
                "command",
                "Command",
                self.command.as_str(),
                "Shell command; %i expands to the input files, %o to the output file",
            ),
            FilterProperty::new(
                "working_dir",
                "Working directory",
                self.working_dir.to_string_lossy().into_owned(),
                "Directory the command runs in",
            ),
            FilterProperty::new(
                "output_file",
                "Output file",
                self.output_file.as_str(),
                "Ion file the command writes, empty for none",
            ),
            FilterProperty::new(
                "block_input_ions",
                "Block input ions",
                self.block_input_ions,
                "Do not pass the input ions on",
            ),
            FilterProperty::new(
                "clean_up",
                "Remove input files",
                self.clean_up,
                "Delete the written input files afterwards",
            ),
        ]
    }

    fn set_property(
        &mut self,
        key: &str,
        value: &PropertyValue,
    ) -> Result<PropertyEffect, PropertyError> {
        use PropertyEffect::{Cosmetic, Recompute};
        match key {
            "command" => {
                let s = expect_str(key, value)?.to_string();
                Ok(update(&mut self.command, s, Recompute))
            }
            "working_dir" => {
                let s = expect_str(key, value)?;
                if s.is_empty() {
                    return Err(PropertyError::invalid(key, "must not be empty"));
                }
                Ok(update(&mut self.working_dir, PathBuf::from(s), Recompute))
            }
            "output_file" => {
                let s = expect_str(key, value)?.to_string();
                Ok(update(&mut self.output_file, s, Recompute))
            }
            "block_input_ions" => {
                let b = expect_bool(key, value)?;
                Ok(update(&mut self.block_input_ions, b, Recompute))
            }
            "clean_up" => {
                let b = expect_bool(key, value)?;
                Ok(update(&mut self.clean_up, b, Cosmetic))
            }
            _ => Err(PropertyError::UnknownKey(key.to_string())),
        }
    }

    fn num_bytes_for_cache(&self, _n_objects: usize) -> Option<usize> {
        // Output size depends on the command
        None
    }

    fn block_mask(&self) -> StreamMask {
        if self.block_input_ions {
            StreamMask::IONS
        } else {
            StreamMask::empty()
        }
    }

    fn emit_mask(&self) -> StreamMask {
        StreamMask::IONS
    }

    fn use_mask(&self) -> StreamMask {
        StreamMask::IONS
    }

    fn can_be_hazardous(&self) -> bool {
        true
    }

    fn specific_error_string(&self, code: ErrorCode) -> &'static str {
        match code {
            EXT_ERR_SPAWN => "Unable to start the external program",
            EXT_ERR_COMMAND_FAILED => "The external program reported failure",
            EXT_ERR_WRITE => "Unable to write input files for the external program",
            EXT_ERR_READ_OUTPUT => "Unable to read the external program's output",
            EXT_ERR_NO_COMMAND => "No command given",
            _ => "Unknown external program error",
        }
    }

    fn read_state(&mut self, state: &FilterState, base_dir: &Path) -> Result<(), StateError> {
        state.apply_common(self)?;
        if self.working_dir.is_relative() {
            self.working_dir = base_dir.join(&self.working_dir);
        }
        Ok(())
    }
}
