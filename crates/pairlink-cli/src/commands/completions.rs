//! Shell completions generation and installation.

use std::path::PathBuf;
use std::{env, fs, io};

use anyhow::{bail, Context, Result};
use clap::CommandFactory;
use clap_complete::{generate, Shell};

use super::{Cli, CompletionsAction, ShellType};

const BIN_NAME: &str = "pairlink";

impl From<ShellType> for Shell {
    fn from(shell: ShellType) -> Self {
        match shell {
            ShellType::Bash => Self::Bash,
            ShellType::Zsh => Self::Zsh,
            ShellType::Fish => Self::Fish,
            ShellType::PowerShell => Self::PowerShell,
            ShellType::Elvish => Self::Elvish,
        }
    }
}

/// Run the completions command.
pub fn run(action: CompletionsAction) -> Result<()> {
    match action {
        CompletionsAction::Install { shell } => install(resolve_shell(shell)?),
        CompletionsAction::Uninstall { shell } => uninstall(resolve_shell(shell)?),
        CompletionsAction::Generate { shell } => {
            let mut cmd = Cli::command();
            generate(Shell::from(shell), &mut cmd, BIN_NAME, &mut io::stdout());
            Ok(())
        }
    }
}

fn render(shell: ShellType) -> String {
    let mut cmd = Cli::command();
    let mut buf = Vec::new();
    generate(Shell::from(shell), &mut cmd, BIN_NAME, &mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

fn resolve_shell(shell: Option<ShellType>) -> Result<ShellType> {
    if let Some(shell) = shell {
        return Ok(shell);
    }
    let path = env::var("SHELL").context(
        "Could not detect shell from $SHELL environment variable.\n\
         Use --shell to specify your shell manually.",
    )?;
    shell_from_path(&path)
}

fn shell_from_path(path: &str) -> Result<ShellType> {
    let name = path.rsplit('/').next().unwrap_or(path).to_lowercase();
    match name.as_str() {
        "bash" => Ok(ShellType::Bash),
        "zsh" => Ok(ShellType::Zsh),
        "fish" => Ok(ShellType::Fish),
        "pwsh" | "powershell" => Ok(ShellType::PowerShell),
        "elvish" => Ok(ShellType::Elvish),
        other => bail!(
            "Unknown shell: {other}\n\
             Supported shells: bash, zsh, fish, powershell, elvish"
        ),
    }
}

/// Where completions for `shell` are installed, relative to `home`.
fn target_path(shell: ShellType, home: &std::path::Path) -> PathBuf {
    let data = env::var("XDG_DATA_HOME").map_or_else(|_| home.join(".local/share"), PathBuf::from);
    let config = env::var("XDG_CONFIG_HOME").map_or_else(|_| home.join(".config"), PathBuf::from);
    match shell {
        ShellType::Bash => data.join("bash-completion/completions").join(BIN_NAME),
        ShellType::Zsh => data.join("zsh/site-functions").join(format!("_{BIN_NAME}")),
        ShellType::Fish => config.join("fish/completions").join(format!("{BIN_NAME}.fish")),
        ShellType::PowerShell => config
            .join("powershell/Microsoft.PowerShell_profile.d")
            .join(format!("{BIN_NAME}.ps1")),
        ShellType::Elvish => home.join(".elvish/lib").join(format!("{BIN_NAME}.elv")),
    }
}

fn home() -> Result<PathBuf> {
    env::var_os("HOME")
        .filter(|h| !h.is_empty())
        .map(PathBuf::from)
        .context("Could not determine home directory")
}

fn install(shell: ShellType) -> Result<()> {
    let path = target_path(shell, &home()?);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
    }
    fs::write(&path, render(shell))
        .with_context(|| format!("Failed to write completions to: {}", path.display()))?;

    println!("✓ Installed {shell:?} completions to: {}", path.display());
    match shell {
        ShellType::Zsh => {
            println!("  Make sure ~/.local/share/zsh/site-functions is on your fpath.");
        }
        ShellType::PowerShell => println!("  Load it from your profile: . {}", path.display()),
        ShellType::Elvish => println!("  Add `use {BIN_NAME}` to ~/.elvish/rc.elv"),
        ShellType::Bash | ShellType::Fish => println!("  Restart your shell to pick them up."),
    }
    Ok(())
}

fn uninstall(shell: ShellType) -> Result<()> {
    let path = target_path(shell, &home()?);
    if path.exists() {
        fs::remove_file(&path).with_context(|| format!("Failed to remove: {}", path.display()))?;
        println!("✓ Removed {shell:?} completions from: {}", path.display());
    } else {
        println!("No completions file found at: {}", path.display());
    }
    Ok(())
}
