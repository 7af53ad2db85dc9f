use std::env;

const USAGE: &str = "Usage: rustymod run <job.yaml> [--dry]
       rustymod validate <job.yaml>
       rustymod apply <transform> <file> [--dry]
       rustymod worker";

#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Run { job: String },
    Validate { job: String },
    Apply { transform: String, file: String },
    Worker,
}

#[derive(Debug, PartialEq, Eq)]
pub struct Opts {
    pub command: Command,
    pub dry: bool,
}

pub fn get_opts() -> Opts {
    let args: Vec<String> = env::args().skip(1).collect();
    match parse(&args) {
        Ok(opts) => opts,
        Err(msg) => {
            eprintln!("{}\n{}", msg, USAGE);
            std::process::exit(1);
        }
    }
}

pub fn parse(args: &[String]) -> Result<Opts, String> {
    let dry = args.iter().any(|a| a == "--dry");
    let rest: Vec<&str> = args
        .iter()
        .map(String::as_str)
        .filter(|a| *a != "--dry")
        .collect();

    let command = match rest.as_slice() {
        ["run", job] => Command::Run { job: job.to_string() },
        ["validate", job] => Command::Validate { job: job.to_string() },
        ["apply", transform, file] => Command::Apply {
            transform: transform.to_string(),
            file: file.to_string(),
        },
        ["worker"] => Command::Worker,
        [] => return Err("missing subcommand".to_string()),
        [other, ..] => {
            return Err(format!("Unknown or incomplete subcommand: {} (supported: run, validate, apply, worker)", other))
        }
    };
    Ok(Opts { command, dry })
}
