use env_logger::{Builder, Env, Target};
use std::fs::OpenOptions;
use std::io::{self, Write};

use crate::config::LoggingConfig;

/// Copies every write to both sinks
struct TeeWriter<A, B> {
    primary: A,
    secondary: B,
}

impl<A: Write, B: Write> Write for TeeWriter<A, B> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.primary.write_all(buf)?;
        self.secondary.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.primary.flush()?;
        self.secondary.flush()
    }
}

/// Initialise env_logger. RUST_LOG wins over `--verbose`, which wins over the config level.
/// With `[logging].file` set, output goes to stderr and is appended to that file.
pub fn init_logging(config: &LoggingConfig, verbose: bool) -> io::Result<()> {
    let default_level = if verbose { "debug" } else { config.level.as_str() };
    let mut builder = Builder::from_env(Env::default().default_filter_or(default_level));

    if let Some(path) = &config.file {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(TeeWriter {
            primary: io::stderr(),
            secondary: file,
        })));
    }

    builder.init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tee_writes_to_both_sinks() {
        let mut tee = TeeWriter {
            primary: Vec::new(),
            secondary: Vec::new(),
        };
        writeln!(tee, "[INFO] Collecting data for 2 enabled stations").unwrap();
        tee.flush().unwrap();

        assert_eq!(tee.primary, tee.secondary);
        assert_eq!(
            String::from_utf8(tee.primary).unwrap(),
            "[INFO] Collecting data for 2 enabled stations\n"
        );
    }
}
