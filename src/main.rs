//! Mica Compiler CLI
//!
//! The `micac` command is the main entry point for the Mica compiler.

use clap::Parser as ClapParser;
use mica::backend;
use mica::ir::{print_module, Lowerer};
use mica::target::Target;
use mica::{lexer, parser};
use std::fs;
use std::path::PathBuf;
use std::process::Command;

#[derive(ClapParser)]
#[command(name = "micac")]
#[command(version = mica::VERSION)]
#[command(about = "The Mica Compiler", long_about = None)]
struct Cli {
    /// Input file to compile
    #[arg(value_name = "FILE")]
    input: Option<PathBuf>,

    /// JIT-compile and run the program instead of emitting an executable
    #[arg(long)]
    run: bool,

    /// Print the resolved target descriptor and exit
    #[arg(long)]
    target_info: bool,

    /// Target triple (defaults to the host)
    #[arg(long, value_name = "TRIPLE")]
    target: Option<String>,
}

fn main() -> miette::Result<()> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) if e.use_stderr() => {
            let _ = e.print();
            std::process::exit(1);
        }
        Err(e) => {
            // --help / --version
            let _ = e.print();
            return Ok(());
        }
    };

    let target = match &cli.target {
        Some(triple) => Target::from_triple(triple),
        None => Target::host(),
    };

    if cli.target_info {
        println!("Target:       {}", target.name());
        println!("Triple:       {}", target.triple());
        println!("Pointer size: {} bytes", target.pointer_size());
        println!("Libc:         {}", target.libc_name());
        println!("Requires PIC: {}", target.requires_pic());
        println!("Requires PIE: {}", target.requires_pie());
        println!("Uses C ABI:   {}", target.uses_c_abi());
        return Ok(());
    }

    let input = cli
        .input
        .ok_or_else(|| miette::miette!("No input file given"))?;
    let source = fs::read_to_string(&input)
        .map_err(|e| miette::miette!("Failed to read {}: {}", input.display(), e))?;

    let (tokens, warnings) =
        lexer::lex(&source).map_err(|e| miette::miette!("Lexer error: {}", e))?;
    for w in &warnings {
        eprintln!("Warning: {}", w);
    }

    let program =
        parser::parse(&source, tokens).map_err(|e| miette::miette!("Parser error: {}", e))?;

    let module_name = input
        .file_stem()
        .unwrap_or_default()
        .to_string_lossy()
        .into_owned();
    let module = Lowerer::new(module_name, target)
        .lower_program(&program)
        .map_err(|e| miette::miette!("Lowering error: {}", e))?;

    if cli.run {
        match backend::run_jit(&module, "main")
            .map_err(|e| miette::miette!("Execution failed: {}", e))?
        {
            Some(code) => println!("Program exited with code: {}", code),
            None => println!("Program completed successfully."),
        }
        return Ok(());
    }

    println!("{}", print_module(&module));

    let object = backend::emit_object(&module)
        .map_err(|e| miette::miette!("Code generation failed: {}", e))?;
    fs::write("output.o", object)
        .map_err(|e| miette::miette!("Failed to write output.o: {}", e))?;

    let status = Command::new("cc")
        .args(["output.o", "-o", "output"])
        .status()
        .map_err(|e| miette::miette!("Failed to invoke linker: {}", e))?;
    if !status.success() {
        return Err(miette::miette!("Linking failed"));
    }

    println!("Compilation completed successfully.");
    Ok(())
}
