use clap::builder::PossibleValuesParser;
use clap::{command, Arg, ArgAction, ArgMatches, Command};

pub const LOGGING_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

pub fn expect_arg<'a>(m: &'a ArgMatches, arg: &str) -> &'a str {
    m.get_one::<String>(arg)
        .unwrap_or_else(|| panic!("argument \"{}\" has to be set in CLI at all times", arg))
        .as_str()
}

pub fn args() -> Command {
    command!()
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("configure logging level to use")
                .value_name("LEVEL")
                .value_parser(PossibleValuesParser::new(LOGGING_LEVELS))
                .default_value(LOGGING_LEVELS[2]),
        )
        .arg(
            Arg::new("program")
                .value_name("PROGRAM")
                .help("Assembly program to be analyzed")
                .required(true),
        )
        .arg(
            Arg::new("layout")
                .value_name("LAYOUT")
                .help("Layout file classifying the initial memory contents")
                .required(true),
        )
        .arg(
            Arg::new("allow-unknown")
                .long("allow-unknown")
                .help("Silence warnings about instructions without modeled semantics")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("allow-bit-moves")
                .long("allow-bit-moves")
                .help("Silence warnings about bit-rearranging instructions")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("allow-carry")
                .long("allow-carry")
                .help("Silence warnings about carry-flag usage")
                .action(ArgAction::SetTrue),
        )
}
