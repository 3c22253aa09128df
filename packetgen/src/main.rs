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

//! Packet declaration analyzer and layout generator.

use argh::FromArgs;
use codespan_reporting::term::termcolor;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use packetgen::{analyzer, ast, backends};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum OutputFormat {
    Json,
    Layout,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.to_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "layout" => Ok(Self::Layout),
            _ => Err(format!("could not parse {input:?}, valid option are 'json', 'layout'.")),
        }
    }
}

#[derive(FromArgs, Debug)]
/// Packet declaration analyzer and layout generator.
struct Opt {
    #[argh(switch)]
    /// print tool version and exit.
    version: bool,

    #[argh(option, default = "OutputFormat::Json")]
    /// generate output in this format ("json", "layout").
    /// The output will be printed on stdout in all cases.
    output_format: OutputFormat,

    #[argh(positional)]
    /// input file, holding the declarations in JSON format.
    input_file: Option<String>,

    #[argh(option)]
    /// exclude declarations from the generated output.
    exclude_declaration: Vec<String>,
}

/// Remove declarations listed in the input filter.
fn filter_declarations(file: ast::File, exclude_declarations: &[String]) -> ast::File {
    ast::File {
        declarations: file
            .declarations
            .into_iter()
            .filter(|decl| !exclude_declarations.iter().any(|id| id == decl.id()))
            .collect(),
        ..file
    }
}

fn emit(
    sources: &analyzer::SourceDatabase,
    diagnostics: &analyzer::Diagnostics,
) -> Result<(), String> {
    let writer = termcolor::StandardStream::stderr(termcolor::ColorChoice::Auto);
    let result = diagnostics
        .emit(sources, &mut writer.lock())
        .map_err(|err| format!("could not print analyzer diagnostics: {err}"));
    result
}

fn generate_backend(opt: &Opt, input_file: &str) -> Result<(), String> {
    let text = std::fs::read_to_string(input_file)
        .map_err(|err| format!("could not read {input_file}: {err}"))?;
    let mut sources = analyzer::SourceDatabase::new();
    sources.add(input_file.to_owned(), text.clone());

    let file = ast::File::from_json(&text)
        .map_err(|err| format!("could not parse {input_file}: {err}"))?;
    let file = filter_declarations(file, &opt.exclude_declaration);
    let decls = match analyzer::analyze(&file) {
        Ok(decls) => decls,
        Err(diagnostics) => {
            emit(&sources, &diagnostics)?;
            return Err(String::from("Analysis failed"));
        }
    };
    emit(&sources, decls.warnings())?;

    let artifacts = backends::artifacts::generate(&decls);
    let output = match opt.output_format {
        OutputFormat::Json => backends::json::generate(&artifacts)?,
        OutputFormat::Layout => {
            backends::summary::generate(&artifacts).map_err(|err| err.to_string())?
        }
    };
    println!("{output}");
    Ok(())
}

fn main() -> Result<(), String> {
    let opt: Opt = argh::from_env();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    if opt.version {
        println!("packetgen {}\nCopyright (C) 2026 Google LLC", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let Some(input_file) = opt.input_file.as_ref() else {
        return Err("No input file is specified".to_owned());
    };

    generate_backend(&opt, input_file)
}
