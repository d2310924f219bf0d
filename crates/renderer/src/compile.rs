use std::borrow::Cow;
use std::collections::BTreeMap;

use wgpu::naga::front::glsl::{Frontend, Options, ParseErrors};
use wgpu::naga::valid::{Capabilities, ValidationError, ValidationFlags, Validator};
use wgpu::naga::{ShaderStage, WithSpan};

use crate::types::InitializationError;

/// Vertex and fragment GLSL handed to the engine.
#[derive(Debug, Clone, Copy)]
pub struct ProgramSource<'a> {
    pub vertex: &'a str,
    pub fragment: &'a str,
}

impl Default for ProgramSource<'static> {
    fn default() -> Self {
        Self {
            vertex: crate::effect::VERTEX_SHADER,
            fragment: crate::effect::FRAGMENT_SHADER,
        }
    }
}

fn stage_name(stage: ShaderStage) -> &'static str {
    match stage {
        ShaderStage::Vertex => "vertex",
        ShaderStage::Fragment => "fragment",
        ShaderStage::Compute => "compute",
        _ => "unknown",
    }
}

/// Parses and validates both stages with naga so errors carry source lines
/// before any GPU work happens.
pub fn validate_program(source: &ProgramSource<'_>) -> Result<(), InitializationError> {
    validate_stage(ShaderStage::Vertex, source.vertex)?;
    validate_stage(ShaderStage::Fragment, source.fragment)
}

fn validate_stage(stage: ShaderStage, source: &str) -> Result<(), InitializationError> {
    let mut frontend = Frontend::default();
    let module = frontend
        .parse(&Options::from(stage), source)
        .map_err(|errors| parse_error(stage, source, &errors))?;
    Validator::new(ValidationFlags::all(), Capabilities::empty())
        .validate(&module)
        .map_err(|error| validation_error(stage, source, &error))?;
    Ok(())
}

fn parse_error(stage: ShaderStage, source: &str, errors: &ParseErrors) -> InitializationError {
    let located = errors.errors.iter().map(|error| {
        let line = error.meta.location(source).line_number as usize;
        (line, error.kind.to_string())
    });
    compile_error(stage, source, located)
}

/// Line 0 stands for errors naga cannot tie to a span.
fn validation_error(
    stage: ShaderStage,
    source: &str,
    error: &WithSpan<ValidationError>,
) -> InitializationError {
    let line = error
        .location(source)
        .map_or(0, |location| location.line_number as usize);
    let mut message = error.as_inner().to_string();
    let mut cause = std::error::Error::source(error.as_inner());
    while let Some(inner) = cause {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        cause = std::error::Error::source(inner);
    }
    compile_error(stage, source, std::iter::once((line, message)))
}

fn compile_error(
    stage: ShaderStage,
    source: &str,
    located: impl Iterator<Item = (usize, String)>,
) -> InitializationError {
    let mut by_line: BTreeMap<usize, Vec<String>> = BTreeMap::new();
    let mut diagnostics = Vec::new();
    for (line, kind) in located {
        let message = format!("ERROR: 0:{line}: {kind}");
        by_line.entry(line).or_default().push(message.clone());
        diagnostics.push(message);
    }
    InitializationError::CompileError {
        stage: stage_name(stage),
        diagnostics: diagnostics.join("\n"),
        annotated_source: annotate_source(source, &by_line),
    }
}

/// Numbers every line as `N: <line>` and places `^^^ <message>` under each
/// line that has diagnostics.
pub fn annotate_source(source: &str, errors: &BTreeMap<usize, Vec<String>>) -> String {
    source
        .split('\n')
        .enumerate()
        .map(|(index, line)| {
            let number = index + 1;
            let mut annotated = format!("{number}: {line}");
            if let Some(messages) = errors.get(&number) {
                annotated.push_str("\n\n^^^ ");
                annotated.push_str(&messages.join("\n"));
            }
            annotated
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Creates a GLSL shader module, surfacing device validation errors.
pub(crate) fn create_module(
    device: &wgpu::Device,
    stage: ShaderStage,
    source: &str,
) -> Result<wgpu::ShaderModule, InitializationError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(match stage {
            ShaderStage::Vertex => "crt vertex",
            _ => "crt fragment",
        }),
        source: wgpu::ShaderSource::Glsl {
            shader: Cow::Owned(source.to_owned()),
            stage,
            defines: &[],
        },
    });
    if let Some(error) = pollster::block_on(device.pop_error_scope()) {
        return Err(InitializationError::CompileError {
            stage: stage_name(stage),
            diagnostics: error.to_string(),
            annotated_source: annotate_source(source, &BTreeMap::new()),
        });
    }
    Ok(module)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_program_validates() {
        validate_program(&ProgramSource::default()).unwrap();
    }

    #[test]
    fn invalid_fragment_reports_annotated_line() {
        let broken = "#version 450\nlayout(location = 0) out vec4 outColor;\nvoid main() {\n    outColor = vec4(missing, 1.0);\n}\n";
        let source = ProgramSource {
            vertex: crate::effect::VERTEX_SHADER,
            fragment: broken,
        };
        let err = validate_program(&source).unwrap_err();
        match err {
            InitializationError::CompileError {
                stage,
                diagnostics,
                annotated_source,
            } => {
                assert_eq!(stage, "fragment");
                assert!(diagnostics.contains("ERROR: 0:4:"), "{diagnostics}");
                assert!(annotated_source.starts_with("1: #version 450"));
                assert!(
                    annotated_source.contains("4:     outColor = vec4(missing, 1.0);\n\n^^^ ERROR: 0:4:"),
                    "{annotated_source}"
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn parsed_but_invalid_fragment_is_rejected() {
        let unsupported = "#version 450\nlayout(push_constant) uniform Push { vec4 tint; } pc;\nlayout(location = 0) out vec4 outColor;\nvoid main() {\n    outColor = pc.tint;\n}\n";
        let mut frontend = Frontend::default();
        frontend
            .parse(&Options::from(ShaderStage::Fragment), unsupported)
            .unwrap();

        let source = ProgramSource {
            vertex: crate::effect::VERTEX_SHADER,
            fragment: unsupported,
        };
        match validate_program(&source).unwrap_err() {
            InitializationError::CompileError {
                stage,
                diagnostics,
                annotated_source,
            } => {
                assert_eq!(stage, "fragment");
                assert!(diagnostics.starts_with("ERROR: 0:2:"), "{diagnostics}");
                assert!(diagnostics.contains("PUSH_CONSTANT"), "{diagnostics}");
                assert!(
                    annotated_source.contains("2: layout(push_constant) uniform Push { vec4 tint; } pc;\n\n^^^ ERROR: 0:2:"),
                    "{annotated_source}"
                );
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn annotation_numbers_every_line() {
        let mut errors = BTreeMap::new();
        errors.insert(2, vec!["ERROR: 0:2: bad".to_string()]);
        let annotated = annotate_source("a\nb\nc", &errors);
        assert_eq!(annotated, "1: a\n2: b\n\n^^^ ERROR: 0:2: bad\n3: c");
    }
}
