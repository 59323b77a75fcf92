#![forbid(unsafe_code)]

#[cfg(unix)]
mod unix {
    use guard::control::socket_path;
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;
    use std::fs;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::process::{Child, Command, Output, Stdio};
    use std::thread::sleep;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    #[test]
    fn signals_trigger_dump_save_and_shutdown() -> io::Result<()> {
        let dir = tempdir()?;
        let mount = dir.path().canonicalize()?;
        let runtime_dir = mount.join("run");
        let config_path = mount.join("config.toml");
        write_config(&config_path, &runtime_dir)?;
        fs::write(mount.join("pattern.db"), "evil\n")?;

        let child = Command::new(env!("CARGO_BIN_EXE_amguardd"))
            .arg("--config")
            .arg(&config_path)
            .arg("--no-intercept")
            .arg(&mount)
            .env_remove("AMGUARD_LOG")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let pid = Pid::from_raw(child.id() as i32);
        let socket = socket_path(&runtime_dir, &mount);
        wait_for(&socket)?;

        ctl(&runtime_dir, &mount, &["-a", "worm"])?;
        let listed = ctl(&runtime_dir, &mount, &["-l"])?;
        assert_eq!(listed.stdout, b"evil\nworm\n");

        kill(pid, Signal::SIGUSR1).ok();
        sleep(Duration::from_millis(300));

        kill(pid, Signal::SIGUSR2).ok();
        sleep(Duration::from_millis(300));
        assert_eq!(fs::read(mount.join("pattern.db"))?, b"evil\nworm\n");

        ctl(&runtime_dir, &mount, &["-r", "evil"])?;

        kill(pid, Signal::SIGTERM).ok();
        let output = wait_for_output(child)?;

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        assert!(output.status.success(), "{combined}");
        assert!(combined.contains("guard status"));
        assert!(combined.contains("pattern database saved"));
        assert!(combined.contains("guard stopped"));
        assert_eq!(fs::read(mount.join("pattern.db"))?, b"worm\n");
        assert!(!socket.exists());

        Ok(())
    }

    #[test]
    fn ctl_rejects_oversized_pattern_without_daemon() -> io::Result<()> {
        let dir = tempdir()?;
        let oversized = "x".repeat(257);
        let output = Command::new(env!("CARGO_BIN_EXE_amguardctl"))
            .arg("--runtime-dir")
            .arg(dir.path())
            .arg("-a")
            .arg(&oversized)
            .arg(dir.path())
            .output()?;

        assert!(!output.status.success());
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("at most 256"), "{stderr}");
        Ok(())
    }

    #[test]
    fn ctl_fails_when_no_daemon_listens() -> io::Result<()> {
        let dir = tempdir()?;
        let output = Command::new(env!("CARGO_BIN_EXE_amguardctl"))
            .arg("--runtime-dir")
            .arg(dir.path())
            .arg("-l")
            .arg(dir.path())
            .output()?;

        assert!(!output.status.success());
        assert!(String::from_utf8_lossy(&output.stderr).contains("is amguardd running?"));
        Ok(())
    }

    fn ctl(runtime_dir: &Path, mount: &Path, args: &[&str]) -> io::Result<Output> {
        let output = Command::new(env!("CARGO_BIN_EXE_amguardctl"))
            .arg("--runtime-dir")
            .arg(runtime_dir)
            .args(args)
            .arg(mount)
            .output()?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "amguardctl {args:?} failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }
        Ok(output)
    }

    fn write_config(path: &Path, runtime_dir: &PathBuf) -> io::Result<()> {
        let contents = format!(
            "[database]\n\
lock_immutable = false\n\n\
[control]\n\
runtime_dir = {runtime_dir:?}\n\n\
[persistence]\n\
save_on_shutdown = true\n"
        );
        fs::write(path, contents)
    }

    fn wait_for(socket: &Path) -> io::Result<()> {
        let start = Instant::now();
        while !socket.exists() {
            if start.elapsed() > Duration::from_secs(10) {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "control socket did not appear",
                ));
            }
            sleep(Duration::from_millis(50));
        }
        Ok(())
    }

    fn wait_for_output(mut child: Child) -> io::Result<Output> {
        let start = Instant::now();
        loop {
            if child.try_wait()?.is_some() {
                break;
            }
            if start.elapsed() > Duration::from_secs(10) {
                let _ = child.kill();
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "amguardd did not exit",
                ));
            }
            sleep(Duration::from_millis(50));
        }
        child.wait_with_output()
    }
}

#[cfg(not(unix))]
#[test]
fn signals_trigger_dump_save_and_shutdown() {
    // Signals are only supported in the Unix build.
}
