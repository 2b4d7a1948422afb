//! Config subcommand handlers.

use std::path::PathBuf;

use comfortlink_config::{self as config, Config};
use secrecy::SecretString;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts};
use crate::error::CliError;
use crate::output;

fn target_path(global: &GlobalOpts) -> PathBuf {
    global
        .config_file
        .clone()
        .unwrap_or_else(config::config_path)
}

fn load(global: &GlobalOpts) -> Result<Config, CliError> {
    Ok(config::load_config_from(&target_path(global))?)
}

fn show_detail(cfg: &Config) -> String {
    let a = &cfg.account;
    let p = &cfg.polling;
    [
        format!("Username:        {}", a.username.as_deref().unwrap_or("-")),
        format!("Password:        {}", a.password.as_deref().unwrap_or("(keyring/env)")),
        format!("Portal:          {}", a.base_url),
        format!("Timeout:         {}s", a.timeout),
        format!("Insecure TLS:    {}", a.insecure),
        format!("Poll interval:   {}s", p.interval),
        format!("Auth retry:      {}s", p.auth_retry_delay),
        format!("Max failures:    {}", p.max_consecutive_failures),
        format!("Backoff ceiling: {}s", p.backoff_ceiling),
        format!("Concurrency:     {}", p.detail_concurrency),
    ]
    .join("\n")
}

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Path => {
            output::print_output(&target_path(global).display().to_string(), global.quiet);
            Ok(())
        }

        ConfigCommand::Init { username, force } => {
            let path = target_path(global);
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            let username = username.trim().to_owned();
            if username.is_empty() {
                return Err(CliError::Validation {
                    field: "username".into(),
                    reason: "must not be empty".into(),
                });
            }

            let mut cfg = Config::default();
            cfg.account.username = Some(username);
            config::save_config_to(&path, &cfg)?;
            output::print_output(
                &format!(
                    "Wrote {}\nStore your password with: comfortlink config set-password",
                    path.display()
                ),
                global.quiet,
            );
            Ok(())
        }

        ConfigCommand::Show => {
            let mut cfg = load(global)?;
            if cfg.account.password.is_some() {
                cfg.account.password = Some("********".into());
            }
            let rendered = output::render_single(global.output, &cfg, show_detail, |c| {
                c.account.username.clone().unwrap_or_default()
            })?;
            output::print_output(&rendered, global.quiet);
            Ok(())
        }

        ConfigCommand::SetPassword { username } => {
            let username = match username {
                Some(u) => u,
                None => load(global)?
                    .account
                    .username
                    .ok_or_else(|| CliError::Validation {
                        field: "username".into(),
                        reason: "pass --username or set account.username in the config".into(),
                    })?,
            };

            let password = rpassword::prompt_password(format!("Password for {username}: "))?;
            if password.is_empty() {
                return Err(CliError::Validation {
                    field: "password".into(),
                    reason: "must not be empty".into(),
                });
            }
            config::store_password(&username, &SecretString::from(password))?;
            eprintln!("Password stored in system keyring");
            Ok(())
        }
    }
}
