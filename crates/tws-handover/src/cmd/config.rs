use std::path::Path;

use handover_profile::HandoverConfig;

use crate::cmd::ConfigArgs;
use crate::exit::{config_error, io_error, CliError, CliResult, INTERNAL, SUCCESS};
use crate::output::{print_table, OutputFormat};

/// Defaults, overridden by `path` when given.
pub fn load(path: Option<&Path>) -> CliResult<HandoverConfig> {
    let Some(path) = path else {
        return Ok(HandoverConfig::default());
    };
    let text = std::fs::read_to_string(path)
        .map_err(|err| io_error(&format!("reading {}", path.display()), err))?;
    HandoverConfig::from_json(&text)
        .map_err(|err| config_error(&format!("loading {}", path.display()), err))
}

pub fn run(args: ConfigArgs, format: OutputFormat) -> CliResult<i32> {
    let config = load(args.file.as_deref())?;
    let value = serde_json::to_value(&config)
        .map_err(|err| CliError::new(INTERNAL, format!("serialising config: {err}")))?;

    match format {
        OutputFormat::Json => println!("{value}"),
        OutputFormat::Table => {
            let rows = value
                .as_object()
                .map(|fields| {
                    fields
                        .iter()
                        .map(|(key, value)| vec![key.clone(), value.to_string()])
                        .collect()
                })
                .unwrap_or_default();
            print_table(&["FIELD", "VALUE"], rows);
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            let text = config
                .to_json()
                .map_err(|err| config_error("serialising config", err))?;
            println!("{text}");
        }
    }
    Ok(SUCCESS)
}
