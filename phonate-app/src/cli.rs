//! Command-line parsing.

use std::path::PathBuf;

pub const USAGE: &str = "Usage: phonate [play|export|devices|init-config] [options]

  play          synthesize from the stub predictor and play live (default)
  export        render the latest voice offline to a WAV file
  devices       list audio output devices
  init-config   write default settings to the settings path

Options:
  --config <file>     settings file (default: platform data dir)
  --seconds <n>       run / rendition length
  --device <name>     preferred output device
  --out <file.wav>    export destination (default: phonate.wav)";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Play,
    Export,
    Devices,
    InitConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Args {
    pub command: Command,
    pub config: Option<PathBuf>,
    pub seconds: Option<f64>,
    pub device: Option<String>,
    pub out: PathBuf,
}

/// `Ok(None)` means help was requested.
pub fn parse_args<I>(args: I) -> Result<Option<Args>, String>
where
    I: IntoIterator<Item = String>,
{
    let mut command = Command::Play;
    let mut config = None;
    let mut seconds = None;
    let mut device = None;
    let mut out = PathBuf::from("phonate.wav");

    let mut it = args.into_iter().peekable();
    if let Some(first) = it.peek() {
        let parsed = match first.as_str() {
            "play" => Some(Command::Play),
            "export" => Some(Command::Export),
            "devices" => Some(Command::Devices),
            "init-config" => Some(Command::InitConfig),
            _ => None,
        };
        if let Some(c) = parsed {
            command = c;
            it.next();
        }
    }

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "--config" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --config".into());
                };
                config = Some(PathBuf::from(v));
            }
            "--seconds" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --seconds".into());
                };
                let secs = v
                    .parse::<f64>()
                    .map_err(|_| "invalid value for --seconds".to_string())?;
                if !secs.is_finite() || secs <= 0.0 {
                    return Err("--seconds must be positive".into());
                }
                seconds = Some(secs);
            }
            "--device" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --device".into());
                };
                device = Some(v);
            }
            "--out" => {
                let Some(v) = it.next() else {
                    return Err("missing value for --out".into());
                };
                out = PathBuf::from(v);
            }
            "--help" | "-h" => return Ok(None),
            other => return Err(format!("unknown argument: {other}")),
        }
    }

    Ok(Some(Args {
        command,
        config,
        seconds,
        device,
        out,
    }))
}
