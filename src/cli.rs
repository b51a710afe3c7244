use std::env;
use std::path::PathBuf;

pub struct CliOptions {
    pub scenario: Option<PathBuf>,
    pub preset: Option<String>,
    pub seed: Option<u64>,
    pub set_points_out: Option<PathBuf>,
}

pub fn parse_args() -> Result<CliOptions, String> {
    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        std::process::exit(0);
    }
    parse_options(&args)
}

fn parse_options(args: &[String]) -> Result<CliOptions, String> {
    let mut i = 0usize;
    let mut scenario = None;
    let mut preset = None;
    let mut seed = None;
    let mut set_points_out = None;

    while i < args.len() {
        match args[i].as_str() {
            "--scenario" => {
                i += 1;
                let path = args.next_or_err(i, "missing value for --scenario (expected a TOML file path)")?;
                if scenario.replace(PathBuf::from(path)).is_some() {
                    return Err("--scenario provided more than once".to_string());
                }
            }
            "--preset" => {
                i += 1;
                let name = args.next_or_err(i, "missing value for --preset (expected a preset name)")?;
                if preset.replace(name.to_string()).is_some() {
                    return Err("--preset provided more than once".to_string());
                }
            }
            "--seed" => {
                i += 1;
                let raw = args.next_or_err(i, "missing value for --seed (expected a u64)")?;
                let value = raw
                    .parse::<u64>()
                    .map_err(|_| format!("--seed value \"{raw}\" is not a valid u64"))?;
                seed = Some(value);
            }
            "--set-points-out" => {
                i += 1;
                let path = args.next_or_err(i, "missing value for --set-points-out (expected a file path)")?;
                if set_points_out.replace(PathBuf::from(path)).is_some() {
                    return Err("--set-points-out provided more than once".to_string());
                }
            }
            other => return Err(format!("unknown argument: {other}")),
        }
        i += 1;
    }

    if scenario.is_some() && preset.is_some() {
        return Err(
            "arguments `--scenario` and `--preset` are mutually exclusive; choose one source"
                .to_string(),
        );
    }

    if scenario.is_none() && preset.is_none() {
        preset = Some("demo".to_string());
    }

    Ok(CliOptions {
        scenario,
        preset,
        seed,
        set_points_out,
    })
}

trait SliceArgExt {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String>;
}

impl SliceArgExt for [String] {
    fn next_or_err(&self, index: usize, err: &str) -> Result<&str, String> {
        self.get(index)
            .map(String::as_str)
            .ok_or_else(|| err.to_string())
    }
}

pub fn print_usage() {
    eprintln!("ec-controller: energy community round controller");
    eprintln!();
    eprintln!("Usage: ec-controller [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --scenario <path>         Load the community from a TOML file");
    eprintln!("  --preset <name>           Use a built-in community (demo, constrained)");
    eprintln!("  --seed <u64>              Seed the supervisor tie-break");
    eprintln!("  --set-points-out <path>   Export every round's setpoints to CSV");
    eprintln!("  --help                    Show this help message");
    eprintln!();
    eprintln!("If no --scenario or --preset is given, the demo preset is used.");
    eprintln!("Set RUST_LOG (e.g. RUST_LOG=debug) to change log verbosity.");
}
