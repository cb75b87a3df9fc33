//! Predefined technique dumping tool
//!
//! This binary compiles every predefined technique and dumps them, together with
//! their program sources, to a single JSON file.

use lines_technique_build::{
    predefined::{PREDEFINED_TECHNIQUES, PredefinedTechnique},
    techniques::ExecutableTechnique,
};
use serde::Serialize;
use std::{collections::BTreeMap, env, fs, process};

/// A compiled technique bundled with the WGSL of its programs
#[derive(Debug, Clone, Serialize)]
struct DumpedTechnique {
    /// Definition path relative to the build crate
    source: &'static str,
    technique: ExecutableTechnique,
    programs: BTreeMap<&'static str, &'static str>,
}

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() != 2 {
        eprintln!("Usage: {} <output_file>", args[0]);
        eprintln!("Compiles all predefined techniques and dumps them to a JSON file");
        process::exit(1);
    }

    let output_file = &args[1];

    let techniques = match load_predefined_techniques() {
        Ok(techniques) => techniques,
        Err(e) => {
            eprintln!("Error loading predefined techniques: {e}");
            process::exit(1);
        }
    };

    println!("Total techniques found: {}", techniques.len());

    match serde_json::to_string_pretty(&techniques) {
        Ok(json) => {
            if let Err(e) = fs::write(output_file, json) {
                eprintln!("Error writing output file '{output_file}': {e}");
                process::exit(1);
            }
            println!("Successfully wrote {} techniques to '{}'", techniques.len(), output_file);
        }
        Err(e) => {
            eprintln!("Error serializing techniques to JSON: {e}");
            process::exit(1);
        }
    }
}

/// Compiles every predefined technique, failing on the first broken one
fn load_predefined_techniques() -> Result<BTreeMap<&'static str, DumpedTechnique>, Box<dyn std::error::Error>> {
    let mut techniques = BTreeMap::new();

    for predefined in PREDEFINED_TECHNIQUES {
        println!("Processing technique: {} ({})", predefined.name, predefined.path);
        techniques.insert(predefined.name, dump(predefined)?);
    }

    Ok(techniques)
}

fn dump(predefined: &PredefinedTechnique) -> Result<DumpedTechnique, Box<dyn std::error::Error>> {
    let technique = predefined.compile()?;

    if let Some(pass) = technique.passes.iter().find(|pass| predefined.program(&pass.program).is_none()) {
        return Err(format!("program '{}' of '{}' is not embedded", pass.program, predefined.name).into());
    }

    let programs = predefined
        .programs
        .iter()
        .copied()
        .filter(|(name, _)| technique.passes.iter().any(|pass| pass.program == *name))
        .collect();

    Ok(DumpedTechnique {
        source: predefined.path,
        technique,
        programs,
    })
}
