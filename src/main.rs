//! `trifs` — a command-line front-end over the file store, wired up the
//! way a small ops tool for this kind of thing usually is: `clap` for
//! argument parsing, `tracing`/`tracing-subscriber` for `-v`/`-vv`
//! verbosity, process exit codes mirroring the library's error codes.

use std::fs::OpenOptions;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use trifs::{Error, Store};

#[derive(Parser)]
#[command(name = "trifs", about = "A persistent three-file store with Merkle integrity checking")]
struct Cli {
  /// Path to the file-data region.
  #[arg(long, global = true, default_value = "file-data")]
  data: PathBuf,

  /// Path to the directory table.
  #[arg(long, global = true, default_value = "directory")]
  directory: PathBuf,

  /// Path to the hash region.
  #[arg(long, global = true, default_value = "hash")]
  hash: PathBuf,

  /// Increase log verbosity (`-v` for info, `-vv` for debug).
  #[arg(short, long, action = clap::ArgAction::Count, global = true)]
  verbose: u8,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
enum Command {
  /// Create the three backing files with the given file-data size and
  /// directory slot count.
  Init {
    /// Size in bytes of the file-data region; must be a power-of-two
    /// multiple of 256.
    file_data_size: u64,
    /// Number of directory slots.
    slots: u64,
  },
  /// Create a new empty file of `length` zero bytes.
  Create { name: String, length: u64 },
  /// Remove a file.
  Rm { name: String },
  /// Rename a file.
  Rename { old: String, new: String },
  /// Change a file's length.
  Resize { name: String, length: u64 },
  /// Read `count` bytes at `offset` and print them to stdout.
  Read { name: String, offset: u64, count: u64 },
  /// Write bytes read from stdin at `offset`.
  Write { name: String, offset: u64 },
  /// Print a file's length, or nothing (exit 1) if it doesn't exist.
  Size { name: String },
  /// List every live file and its length.
  Ls,
}

fn main() -> ExitCode {
  let cli = Cli::parse();

  let filter = match cli.verbose {
    0 => EnvFilter::new("warn"),
    1 => EnvFilter::new("info"),
    _ => EnvFilter::new("debug"),
  };
  tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();

  match run(cli) {
    Ok(code) => code,
    Err(err) => {
      eprintln!("trifs: {err}");
      ExitCode::from(err.as_code() as u8)
    }
  }
}

fn run(cli: Cli) -> Result<ExitCode, Error> {
  let Cli { data, directory, hash, command, .. } = cli;

  if let Command::Init { file_data_size, slots } = command {
    init_files(&data, &directory, &hash, file_data_size, slots)?;
    return Ok(ExitCode::SUCCESS);
  }

  let store = Store::init(&data, &directory, &hash, num_cpus())?;

  match command {
    Command::Init { .. } => unreachable!(),
    Command::Create { name, length } => {
      store.create(name.as_bytes(), length)?;
      Ok(ExitCode::SUCCESS)
    }
    Command::Rm { name } => {
      store.delete(name.as_bytes())?;
      Ok(ExitCode::SUCCESS)
    }
    Command::Rename { old, new } => {
      store.rename(old.as_bytes(), new.as_bytes())?;
      Ok(ExitCode::SUCCESS)
    }
    Command::Resize { name, length } => {
      store.resize(name.as_bytes(), length)?;
      Ok(ExitCode::SUCCESS)
    }
    Command::Read { name, offset, count } => {
      let mut buf = vec![0u8; count as usize];
      store.read(name.as_bytes(), offset, count, &mut buf)?;
      std::io::stdout().write_all(&buf).map_err(Error::Io)?;
      Ok(ExitCode::SUCCESS)
    }
    Command::Write { name, offset } => {
      let mut data = Vec::new();
      std::io::stdin().read_to_end(&mut data).map_err(Error::Io)?;
      let count = data.len() as u64;
      match store.write(name.as_bytes(), offset, count, &data) {
        Ok(()) => Ok(ExitCode::SUCCESS),
        // Section 6's table reports a write that runs out of space
        // during its implicit resize as code 3, not the generic 2.
        Err(Error::OutOfSpace) => {
          eprintln!("trifs: not enough free space in file-data region");
          Ok(ExitCode::from(3))
        }
        Err(other) => Err(other),
      }
    }
    Command::Size { name } => match store.file_size(name.as_bytes())? {
      Some(length) => {
        println!("{length}");
        Ok(ExitCode::SUCCESS)
      }
      None => Ok(ExitCode::from(1)),
    },
    Command::Ls => {
      // The store has no dedicated directory listing primitive; this
      // walks file_size-style lookups via the same locate path every
      // other operation uses, enumerate-and-print at the CLI layer.
      for name in store.list_names()? {
        let length = store.file_size(&name)?.unwrap_or(0);
        println!("{}\t{}", String::from_utf8_lossy(&name), length);
      }
      Ok(ExitCode::SUCCESS)
    }
  }
}

fn init_files(
  data: &PathBuf,
  directory: &PathBuf,
  hash: &PathBuf,
  file_data_size: u64,
  slots: u64,
) -> Result<(), Error> {
  let geometry = trifs::Geometry::from_file_data_size(file_data_size)?;

  let f = OpenOptions::new().create(true).write(true).truncate(true).open(data)?;
  f.set_len(file_data_size)?;

  let f = OpenOptions::new().create(true).write(true).truncate(true).open(directory)?;
  f.set_len(slots * trifs::DIRECTORY_ENTRY_SIZE)?;

  let f = OpenOptions::new().create(true).write(true).truncate(true).open(hash)?;
  f.set_len(geometry.hash_region_size())?;

  Ok(())
}

fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}
