use std::path::PathBuf;

use clap::Parser;

#[derive(Parser)]
#[command(name = "wirec", bin_name = "wirec")]
#[command(about = "Compile wire-format descriptions to instruction modules")]
pub struct Cli {
    /// Format description AST as JSON
    #[arg(short = 'i', long = "input", value_name = "FILE")]
    pub input: PathBuf,

    /// Write the compiled module container here
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Print a readable instruction listing
    #[arg(long)]
    pub dump: bool,

    /// Print the control-flow graphs in Graphviz dot form
    #[arg(long)]
    pub dot: bool,
}
