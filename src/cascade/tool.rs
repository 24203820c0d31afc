//! External tool backends described as data: which tool, when it applies,
//! how to build its argument list, and where its output lands.

use super::{AttemptContext, Backend};
use crate::error::CompressError;
use crate::probe::{Capability, ToolSpec};
use crate::utils::path_arg;
use async_trait::async_trait;
use std::path::Path;

pub type ArgsBuilder = fn(&AttemptContext<'_>, &str, &str) -> Vec<String>;
pub type Predicate = fn(&AttemptContext<'_>) -> bool;
pub type ExtensionFn = fn(&AttemptContext<'_>) -> String;

/// Which file the tool reads
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolInput {
    /// The prepared (normalized) input
    Prepared,
    /// The untouched source file
    Source,
}

/// A backend that shells out to one external tool
pub struct ToolBackend {
    pub id: &'static str,
    pub tool: &'static ToolSpec,
    pub input: ToolInput,
    pub applies: Predicate,
    pub args: ArgsBuilder,
    pub extension: Option<ExtensionFn>,
    /// The tool writes the result to stdout instead of a path argument
    pub stdout_output: bool,
}

impl ToolBackend {
    pub const fn new(id: &'static str, tool: &'static ToolSpec, args: ArgsBuilder) -> Self {
        Self {
            id,
            tool,
            input: ToolInput::Prepared,
            applies: always,
            args,
            extension: None,
            stdout_output: false,
        }
    }

    pub const fn when(mut self, applies: Predicate) -> Self {
        self.applies = applies;
        self
    }

    pub const fn reading_source(mut self) -> Self {
        self.input = ToolInput::Source;
        self
    }

    pub const fn writing_stdout(mut self) -> Self {
        self.stdout_output = true;
        self
    }

    pub const fn with_extension(mut self, extension: ExtensionFn) -> Self {
        self.extension = Some(extension);
        self
    }
}

pub fn always(_ctx: &AttemptContext<'_>) -> bool {
    true
}

#[async_trait]
impl Backend for ToolBackend {
    fn id(&self) -> &'static str {
        self.id
    }

    fn capability(&self) -> Option<Capability> {
        Some(Capability::Tool(self.tool))
    }

    fn applies(&self, ctx: &AttemptContext<'_>) -> bool {
        (self.applies)(ctx)
    }

    fn output_extension(&self, ctx: &AttemptContext<'_>) -> String {
        match self.extension {
            Some(extension) => extension(ctx),
            None => ctx.prepared.target_ext.clone(),
        }
    }

    async fn compress(&self, ctx: &AttemptContext<'_>, output: &Path) -> Result<(), CompressError> {
        let input = match self.input {
            ToolInput::Prepared => &ctx.prepared.path,
            ToolInput::Source => ctx.source,
        };
        let args = (self.args)(ctx, &path_arg(input), &path_arg(output));
        if self.stdout_output {
            ctx.runner.run_to_file(self.tool.name, &args, output, ctx.timeout).await?;
        } else {
            ctx.runner.run(self.tool.name, &args, ctx.timeout).await?;
        }
        Ok(())
    }
}
