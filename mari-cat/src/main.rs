use clap::Parser;
use mari_cat::FrameParser;

/// `cat` for Mari frames.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// The Mari frame to parse, as a hex string.
    #[clap(value_parser(clap::builder::NonEmptyStringValueParser::new()))]
    input: String,
}

fn main() {
    let args = Args::parse();

    match FrameParser::parse_hex(&args.input) {
        Ok(output) => print!("{output}"),
        Err(err) => {
            eprintln!("invalid frame: {err:?}");
            std::process::exit(1);
        }
    }
}
