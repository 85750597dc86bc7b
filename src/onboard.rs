use std::io::{BufRead, Write};

use anyhow::{Context, Result};

use crate::cli::OnboardOpts;
use crate::envfile::{self, EnvFile};
use crate::lifecycle;
use crate::paths;
use crate::service;
use crate::state;

pub fn run(opts: OnboardOpts) -> Result<()> {
    let dir = paths::ensure_state_dir()?;
    println!("✓ state directory {}", dir.display());

    let env_path = paths::env_file_path();
    if envfile::write_template(&env_path)? {
        println!("✓ wrote starter config {}", env_path.display());
    } else {
        println!("✓ config already present at {}", env_path.display());
    }

    if opts.interactive {
        prompt_for_keys(&env_path, opts.yes)?;
    }

    if opts.install_daemon {
        install_daemon()?;
    }

    println!();
    println!("Next steps:");
    println!("  genxctl doctor   # verify the host environment");
    println!("  genxctl start    # launch the backend");
    println!("  genxctl status   # check on it any time");
    Ok(())
}

/// Ask for each recognized key, keeping the current value on empty input.
/// With --yes every prompt is skipped and current values stand.
fn prompt_for_keys(env_path: &std::path::Path, accept_defaults: bool) -> Result<()> {
    let mut env = EnvFile::load(env_path)?;
    let stdin = std::io::stdin();
    let changed = prompt_for_keys_from(&mut env, &mut stdin.lock(), accept_defaults)?;
    if changed {
        env.save()?;
        println!("✓ updated {}", env_path.display());
    }
    Ok(())
}

fn prompt_for_keys_from(
    env: &mut EnvFile,
    input: &mut impl BufRead,
    accept_defaults: bool,
) -> Result<bool> {
    let keys = [
        (envfile::KEY_OPENAI_API_KEY, "OpenAI API key (blank = fallback mode)"),
        (envfile::KEY_ADMIN_API_TOKEN, "Admin API token (optional)"),
        (envfile::KEY_ORCHESTRATOR_MODE, "Orchestrator mode [single/multi/hybrid]"),
        (envfile::KEY_WEBHOOK_SECURITY, "Verify webhook signatures [true/false]"),
    ];

    let mut changed = false;
    for (key, label) in keys {
        if accept_defaults {
            continue;
        }

        let current = env.get(key).unwrap_or_default();
        let hint = if current.is_empty() {
            String::new()
        } else {
            format!(" [{}]", current)
        };

        loop {
            print!("{}{}: ", label, hint);
            std::io::stdout().flush().ok();

            let mut line = String::new();
            let read = input.read_line(&mut line).context("failed to read input")?;
            let value = line.trim();
            // EOF or empty input keeps the current value.
            if read == 0 || value.is_empty() {
                break;
            }

            // Validate before writing so a typo never lands in the file; a
            // bad answer re-prompts rather than discarding earlier ones.
            if key == envfile::KEY_ORCHESTRATOR_MODE {
                if let Err(err) = value.parse::<envfile::OrchestratorMode>() {
                    eprintln!("⚠ {}", err);
                    continue;
                }
            }

            env.set(key, value);
            changed = true;
            break;
        }
    }

    Ok(changed)
}

/// Register the platform service manager and remember it in the record so
/// uninstall takes the matching unregister path.
fn install_daemon() -> Result<()> {
    let Some(manager) = service::platform_manager() else {
        println!("⚠ no service manager available on this platform; skipping install");
        return Ok(());
    };

    let plan = lifecycle::build_launch_plan()
        .context("cannot install the background service without a launchable backend")?;

    manager
        .register(&plan)
        .with_context(|| format!("failed to register {}", manager.manager().as_str()))?;

    state::update_record(|r| {
        r.manager = manager.manager();
        r.uninstalled_at = None;
    })?;

    println!("✓ registered {} service", manager.manager().as_str());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn template_env(dir: &TempDir) -> EnvFile {
        let path = dir.path().join(".env");
        envfile::write_template(&path).expect("template");
        EnvFile::load(&path).expect("load")
    }

    #[test]
    fn invalid_mode_reprompts_instead_of_aborting() {
        let dir = TempDir::new().expect("tempdir");
        let mut env = template_env(&dir);

        // Key accepted, token skipped, first mode answer rejected and
        // re-asked, webhook flag skipped.
        let mut input = Cursor::new("sk-test\n\nturbo\nmulti\n\n");
        let changed = prompt_for_keys_from(&mut env, &mut input, false).expect("prompt");

        assert!(changed);
        assert_eq!(env.get(envfile::KEY_OPENAI_API_KEY).as_deref(), Some("sk-test"));
        assert_eq!(env.get(envfile::KEY_ORCHESTRATOR_MODE).as_deref(), Some("multi"));
    }

    #[test]
    fn empty_answers_keep_current_values() {
        let dir = TempDir::new().expect("tempdir");
        let mut env = template_env(&dir);

        let mut input = Cursor::new("\n\n\n\n");
        let changed = prompt_for_keys_from(&mut env, &mut input, false).expect("prompt");

        assert!(!changed);
        assert_eq!(env.get(envfile::KEY_ORCHESTRATOR_MODE).as_deref(), Some("single"));
    }

    #[test]
    fn accept_defaults_skips_every_prompt() {
        let dir = TempDir::new().expect("tempdir");
        let mut env = template_env(&dir);

        // No input is consumed at all when defaults are accepted.
        let mut input = Cursor::new("");
        let changed = prompt_for_keys_from(&mut env, &mut input, true).expect("prompt");
        assert!(!changed);
    }
}
