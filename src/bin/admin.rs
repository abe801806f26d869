use std::collections::VecDeque;

use chrono::Duration;

use nav_gateway::auth::{InMemoryClientRegistry, JwtSessionVerifier, UserIdentity};
use nav_gateway::config::{GatewayConfig, CONFIG_PATH_ENV};

fn print_help() {
    eprintln!(
        "\
nav-gateway-admin

USAGE:
  nav-gateway-admin <command> [options]

COMMANDS:
  generate-secret                 Generate a client secret and its stored hash
  hash-secret                     Hash an existing client secret
  issue-token                     Issue a session token for testing
  check-config                    Load and validate the gateway configuration

generate-secret OPTIONS:
  --app-id <id>                   (optional) Print a registry record for this app
  --app-name <name>               (optional) Defaults to the app id

hash-secret OPTIONS:
  --secret <secret>               (required)

issue-token OPTIONS:
  --user-id <id>                  (required)
  --username <name>               (required)
  --role <slug>                   (repeatable) Raw role slug
  --group <slug>                  (repeatable) Raw group slug
  --perm <permission>             (repeatable)
  --kind <access|refresh>         (default: access)
  --ttl-secs <n>                  (default: 900)

check-config OPTIONS:
  --config <path>                 (defaults to env GATEWAY_CONFIG)

ENV:
  JWT_SECRET / JWT_ISSUER / JWT_AUDIENCE (issue-token)
  GATEWAY_CONFIG plus the gateway override variables (check-config)
"
    );
}

fn take_value(args: &mut VecDeque<String>, flag: &str) -> anyhow::Result<String> {
    args.pop_front()
        .ok_or_else(|| anyhow::anyhow!("missing value for {flag}"))
}

fn session_verifier() -> anyhow::Result<JwtSessionVerifier> {
    let secret = std::env::var("JWT_SECRET")
        .map_err(|_| anyhow::anyhow!("JWT_SECRET is required to issue tokens"))?;
    let issuer = std::env::var("JWT_ISSUER").unwrap_or_else(|_| "nav-gateway".to_string());
    let audience = std::env::var("JWT_AUDIENCE").unwrap_or_else(|_| "nav-api".to_string());
    Ok(JwtSessionVerifier::new(secret.as_bytes(), &issuer, &audience))
}

fn main() -> anyhow::Result<()> {
    let mut args: VecDeque<String> = std::env::args().skip(1).collect();
    let Some(command) = args.pop_front() else {
        print_help();
        return Ok(());
    };

    if matches!(command.as_str(), "-h" | "--help" | "help") {
        print_help();
        return Ok(());
    }

    match command.as_str() {
        "generate-secret" => {
            let mut app_id: Option<String> = None;
            let mut app_name: Option<String> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--app-id" => app_id = Some(take_value(&mut args, "--app-id")?),
                    "--app-name" => app_name = Some(take_value(&mut args, "--app-name")?),
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let (secret, hash) = InMemoryClientRegistry::generate_secret();
            println!("secret: {secret}");
            println!("hash:   {hash}");

            if let Some(app_id) = app_id {
                let app_name = app_name.unwrap_or_else(|| app_id.clone());
                let record = serde_json::json!({
                    "secret_hash": hash,
                    "app_id": app_id,
                    "app_name": app_name,
                    "active": true,
                });
                println!("{}", serde_json::to_string_pretty(&record)?);
            }
            eprintln!("note: the secret is shown once; store only the hash");
            Ok(())
        }
        "hash-secret" => {
            let mut secret: Option<String> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--secret" => secret = Some(take_value(&mut args, "--secret")?),
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let secret = secret.ok_or_else(|| anyhow::anyhow!("--secret is required"))?;
            println!("{}", InMemoryClientRegistry::hash_secret(secret.trim()));
            Ok(())
        }
        "issue-token" => {
            let mut user_id: Option<String> = None;
            let mut username: Option<String> = None;
            let mut roles: Vec<String> = Vec::new();
            let mut groups: Vec<String> = Vec::new();
            let mut permissions: Vec<String> = Vec::new();
            let mut refresh = false;
            let mut ttl_secs: i64 = 900;

            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--user-id" => user_id = Some(take_value(&mut args, "--user-id")?),
                    "--username" => username = Some(take_value(&mut args, "--username")?),
                    "--role" => roles.push(take_value(&mut args, "--role")?),
                    "--group" => groups.push(take_value(&mut args, "--group")?),
                    "--perm" => permissions.push(take_value(&mut args, "--perm")?),
                    "--kind" => {
                        refresh = match take_value(&mut args, "--kind")?.as_str() {
                            "access" => false,
                            "refresh" => true,
                            other => anyhow::bail!("unknown token kind: {other}"),
                        };
                    }
                    "--ttl-secs" => {
                        ttl_secs = take_value(&mut args, "--ttl-secs")?.parse()?;
                        if ttl_secs <= 0 {
                            anyhow::bail!("--ttl-secs must be positive");
                        }
                    }
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let user = UserIdentity {
                user_id: user_id.ok_or_else(|| anyhow::anyhow!("--user-id is required"))?,
                username: username.ok_or_else(|| anyhow::anyhow!("--username is required"))?,
                raw_roles: roles,
                raw_groups: groups,
                permissions,
            };

            let verifier = session_verifier()?;
            let ttl = Duration::seconds(ttl_secs);
            let token = if refresh {
                verifier.issue_refresh(&user, ttl)?
            } else {
                verifier.issue_access(&user, ttl)?
            };
            println!("{token}");
            Ok(())
        }
        "check-config" => {
            let mut path: Option<String> = None;
            while let Some(arg) = args.pop_front() {
                match arg.as_str() {
                    "--config" => path = Some(take_value(&mut args, "--config")?),
                    "-h" | "--help" => {
                        print_help();
                        return Ok(());
                    }
                    other => anyhow::bail!("unexpected argument: {other}"),
                }
            }

            let path = path.or_else(|| std::env::var(CONFIG_PATH_ENV).ok());
            let mut config = match path.as_deref() {
                Some(path) => GatewayConfig::from_file(path)?,
                None => GatewayConfig::default(),
            };
            config.apply_overrides(|name| std::env::var(name).ok())?;
            config.validate()?;

            println!("{}", serde_json::to_string_pretty(&config)?);
            println!("ok: configuration valid");
            Ok(())
        }
        other => {
            print_help();
            anyhow::bail!("unknown command: {other}");
        }
    }
}
