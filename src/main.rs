use anyhow::Result;
use env_logger::Env;
use maskcheck::cli::{self, expect_arg};
use maskcheck::config;
use maskcheck::engine::{Device, DeviceOptions};
use maskcheck::parser;
use std::path::Path;

fn main() -> Result<()> {
    let matches = cli::args().get_matches();

    init_logger(expect_arg(&matches, "verbose"));

    let program_path = Path::new(expect_arg(&matches, "program"));
    let layout_path = Path::new(expect_arg(&matches, "layout"));

    let program = parser::load_program(program_path)?;
    let layout = config::load_layout(layout_path)?;

    let options = DeviceOptions {
        warn_unknown_instructions: !matches.get_flag("allow-unknown"),
        warn_bit_rearranging: !matches.get_flag("allow-bit-moves"),
        warn_carry_usage: !matches.get_flag("allow-carry"),
    };

    let mut device = Device::new(options);
    device.load(program, &layout);

    let report = device.run();

    for diagnostic in &report.diagnostics {
        println!("{}", diagnostic);
    }
    if report.is_clean() {
        println!("no findings");
    } else {
        println!(
            "{} leakage warning(s), {} error(s)",
            report.leak_count(),
            report.fault_count()
        );
    }

    println!("\nProgram");
    print!("{}", device.format_program());
    println!("\nRegisters");
    print!("{}", device.format_registers());
    println!("\nMemory");
    print!("{}", device.format_memory());
    if device.stack_in_use() {
        println!("\nStack");
        print!("{}", device.format_stack());
    }

    Ok(())
}

fn init_logger(level: &str) {
    env_logger::Builder::from_env(Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}
