//! Technique analysis tool
//!
//! This binary loads a technique definition (JSON or YAML), compiles it into an
//! ExecutableTechnique and prints the compiled structure: passes in execution
//! order, custom targets, target lifetimes and data flow diagnostics.

use lines_technique_build::techniques::ExecutableTechnique;
use std::env;
use std::path::Path;
use std::process;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() != 2 && args.len() != 3 {
        eprintln!("Usage: {} <technique.json|technique.yaml> [--json]", args[0]);
        eprintln!("Compiles a technique definition and dumps the analyzed result to stdout");
        process::exit(1);
    }

    let technique_path = &args[1];
    let as_json = args.get(2).is_some_and(|arg| arg == "--json");

    if !Path::new(technique_path).exists() {
        eprintln!("Error: Technique file '{technique_path}' does not exist");
        process::exit(1);
    }

    let executable = match ExecutableTechnique::from_file(technique_path) {
        Ok(executable) => executable,
        Err(e) => {
            eprintln!("Error compiling technique '{technique_path}': {e}");
            process::exit(1);
        }
    };

    if as_json {
        match serde_json::to_string_pretty(&executable) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing technique: {e}");
                process::exit(1);
            }
        }
        return;
    }

    println!("Passes ({}):", executable.passes.len());
    for (index, pass) in executable.passes.iter().enumerate() {
        let outputs: Vec<&str> = [&pass.color_output, &pass.depth_output].into_iter().flatten().map(|output| output.target.as_str()).collect();
        let inputs: Vec<String> = pass
            .texture_inputs
            .iter()
            .map(|input| if input.feedback { format!("{} (feedback)", input.target) } else { input.target.clone() })
            .collect();
        println!("  {index}: {} [program {}, {:?}] reads {inputs:?} writes {outputs:?}", pass.name, pass.program, pass.draw);
    }

    println!("Targets ({}):", executable.targets.len());
    for target in &executable.targets {
        let lifetime = executable.lifetime(&target.name);
        println!(
            "  {}: {:?} {:?} {:?}, first written {:?}, last read {:?}",
            target.name,
            target.descriptor.kind,
            target.descriptor.format,
            target.descriptor.size,
            lifetime.and_then(|lifetime| lifetime.first_written),
            lifetime.and_then(|lifetime| lifetime.last_read)
        );
    }

    if !executable.diagnostics.is_empty() {
        println!("Diagnostics ({}):", executable.diagnostics.len());
        for diagnostic in &executable.diagnostics {
            println!("  {diagnostic}");
        }
    }
}
