mod cli;

use std::fs;
use std::process::ExitCode;

use clap::Parser;

use cli::Cli;

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            // Load and compile errors go to standard output.
            println!("error: {message}");
            ExitCode::FAILURE
        }
    }
}

/// Outputs are produced only after the whole pipeline succeeded, so a
/// failing compile never leaves a partial container behind.
fn run(cli: &Cli) -> Result<(), String> {
    let text = fs::read_to_string(&cli.input)
        .map_err(|e| format!("{}: {e}", cli.input.display()))?;
    let module = wirec_compiler::compile(&text).map_err(|e| e.to_string())?;
    if cli.dump {
        print!("{}", wirec_ir::dump::dump(&module));
    }
    if cli.dot {
        print!("{}", wirec_ir::dot::render(&module));
    }
    if let Some(output) = &cli.output {
        let bytes = wirec_ir::container::save(&module).map_err(|e| e.to_string())?;
        fs::write(output, bytes).map_err(|e| format!("{}: {e}", output.display()))?;
    }
    Ok(())
}
