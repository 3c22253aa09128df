// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Human readable layout report.

use std::fmt::Write;

use crate::backends::artifacts::{Artifacts, ParentArtifact, TypeArtifact};

fn write_parent(out: &mut String, kind: &str, artifact: &ParentArtifact) -> std::fmt::Result {
    let view = &artifact.view;
    match &view.parent {
        Some(parent) => write!(out, "{kind} {} : {parent}", view.name)?,
        None => write!(out, "{kind} {}", view.name)?,
    }
    writeln!(out, " (size {}, min {})", view.size, view.min_size)?;
    for field in &view.fields {
        write!(
            out,
            "  {:<24} {:<8} start {:<12} end {:<12} size {}",
            field.name,
            field.owner,
            field.start.to_string(),
            field.end.to_string(),
            field.size
        )?;
        if let Some(bitfield) = &field.bitfield {
            let end = bitfield.shift + bitfield.width;
            write!(out, " bits {}..{end} of {}", bitfield.shift, bitfield.chunk)?;
        }
        writeln!(out)?;
    }
    if let Some(builder) = &artifact.builder {
        let parameters: Vec<&str> =
            builder.parameters.iter().map(|parameter| parameter.name.as_str()).collect();
        writeln!(out, "  parameters: [{}]", parameters.join(", "))?;
        for (field, value) in &builder.constants {
            writeln!(out, "  {field} = {value}")?;
        }
    }
    Ok(())
}

/// Render the layout of every declaration.
pub fn generate(artifacts: &Artifacts) -> Result<String, std::fmt::Error> {
    let mut out = String::new();
    writeln!(out, "// {}", artifacts.endianness)?;
    for (name, artifact) in &artifacts.types {
        match artifact {
            TypeArtifact::Enum(spec) => {
                writeln!(out, "enum {name} : {}", spec.width)?;
                for (tag, value) in &spec.tags {
                    writeln!(out, "  {tag} = {value:#x}")?;
                }
            }
            TypeArtifact::Checksum(spec) => {
                writeln!(out, "checksum {name} : {} \"{}\"", spec.width, spec.function)?
            }
            TypeArtifact::Custom(spec) => match spec.width {
                Some(width) => {
                    writeln!(out, "custom_field {name} : {width} \"{}\"", spec.function)?
                }
                None => writeln!(out, "custom_field {name} \"{}\"", spec.function)?,
            },
            TypeArtifact::Struct(artifact) => write_parent(&mut out, "struct", artifact)?,
            TypeArtifact::Packet(artifact) => write_parent(&mut out, "packet", artifact)?,
        }
    }
    Ok(out)
}
