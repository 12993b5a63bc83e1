//! Boot image assembly and the emulator.

use anyhow::{Result, bail};

use crate::config::ResolvedConfig;
use crate::toolchain::CommandTemplate;
use crate::verbose::dprintln;

/// Build `<name>.iso` from the staging filesystem with `grub-mkrescue`.
pub fn assemble(config: &ResolvedConfig) -> Result<()> {
    let layout = &config.layout;
    let template = CommandTemplate::new(
        config.tools.get("grub-mkrescue")?,
        config.flags.mkrescue.clone(),
    );

    dprintln!("Building {}", layout.iso_path.display());
    let mut cmd = template.command();
    cmd.output(&layout.iso_path).input(&layout.fs_dir);

    let output = cmd.run()?;
    if !output.status.success() {
        bail!(
            "grub-mkrescue failed ({}):\n{}",
            output.status,
            String::from_utf8_lossy(&output.stderr)
        );
    }
    Ok(())
}

/// Boot the image in the emulator, attached to this terminal.
pub fn run_emulator(config: &ResolvedConfig) -> Result<()> {
    let template = CommandTemplate::new(config.tools.get("qemu")?, config.flags.emulator.clone());
    dprintln!("{} {}", template.program, template.args.join(" "));

    let status = template.command().status()?;
    if !status.success() {
        bail!("emulator exited with {status}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Flags, Layout, ToolPaths};
    use std::path::Path;

    fn config(root: &Path, tools: &[(&str, &str)], flags: Flags) -> ResolvedConfig {
        ResolvedConfig {
            project_name: "Perception".into(),
            layout: Layout::with_defaults(root),
            tools: tools
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect::<ToolPaths>(),
            flags,
        }
    }

    #[cfg(unix)]
    #[test]
    fn assemble_writes_iso_from_fs() {
        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("mkrescue.sh");
        std::fs::write(&script, "while [ \"$1\" != -o ]; do shift; done\nls \"$3\" > \"$2\"\n")
            .unwrap();
        let fs_dir = dir.path().join("fs");
        std::fs::create_dir_all(&fs_dir).unwrap();
        std::fs::write(fs_dir.join("shell.app"), "").unwrap();

        let flags = Flags {
            mkrescue: vec![script.display().to_string()],
            ..Flags::default()
        };
        let config = config(dir.path(), &[("grub-mkrescue", "sh")], flags);
        assemble(&config).unwrap();

        let iso = std::fs::read_to_string(&config.layout.iso_path).unwrap();
        assert_eq!(iso.trim(), "shell.app");
    }

    #[cfg(unix)]
    #[test]
    fn failing_mkrescue_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let flags = Flags {
            mkrescue: vec!["-c".into(), "exit 3".into()],
            ..Flags::default()
        };
        let config = config(dir.path(), &[("grub-mkrescue", "sh")], flags);
        assert!(assemble(&config).is_err());
    }

    #[test]
    fn missing_tool_entry_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path(), &[], Flags::default());
        let err = run_emulator(&config).unwrap_err();
        assert!(err.to_string().contains("qemu"));
    }
}
