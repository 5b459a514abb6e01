use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// Bytes replayed by [`OutputCapture::dump`].
pub const DUMP_WINDOW: usize = 1024;

/// Append-only log receiving a background process's stdout and stderr.
///
/// The offset recorded at open marks the start of this run, so a dump only
/// replays what the current child wrote.
#[derive(Debug)]
pub struct OutputCapture {
	path: PathBuf,
	file: Option<File>,
	offset: u64,
}

impl OutputCapture {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self {
			path: path.into(),
			file: None,
			offset: 0,
		}
	}

	/// `/tmp/<binary-name>.log`
	pub fn default_path() -> PathBuf {
		let name = std::env::args_os()
			.next()
			.map(PathBuf::from)
			.and_then(|p| p.file_name().map(|n| n.to_os_string()))
			.unwrap_or_else(|| "respawn".into());
		let mut file = name;
		file.push(".log");
		PathBuf::from("/tmp").join(file)
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	pub fn offset(&self) -> u64 {
		self.offset
	}

	pub fn open(&mut self) -> io::Result<()> {
		let mut file = OpenOptions::new()
			.read(true)
			.append(true)
			.create(true)
			.open(&self.path)?;
		let offset = file.seek(SeekFrom::End(0))?;
		self.file = Some(file);
		self.offset = offset;
		Ok(())
	}

	/// A new handle to the log for a child's stdout or stderr.
	pub fn stdio(&self) -> io::Result<Stdio> {
		match &self.file {
			Some(file) => Ok(Stdio::from(file.try_clone()?)),
			None => Err(io::Error::new(io::ErrorKind::NotConnected, "output capture not open")),
		}
	}

	/// Writes what was logged since open, up to [`DUMP_WINDOW`] bytes, to
	/// `sink`. Best effort: this is for the few lines around an early crash.
	pub fn dump<W: Write>(&self, sink: &mut W) -> io::Result<()> {
		let file = match &self.file {
			Some(f) => f,
			None => return Ok(()),
		};

		let mut buf = vec![0u8; DUMP_WINDOW];
		let mut filled = 0;
		while filled < buf.len() {
			match file.read_at(&mut buf[filled..], self.offset + filled as u64) {
				Ok(0) => break,
				Ok(n) => filled += n,
				Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
				Err(e) => return Err(e),
			}
		}

		writeln!(sink, "daemon output:")?;
		sink.write_all(&buf[..filled])?;
		writeln!(sink)?;

		let logged = file.metadata()?.len().saturating_sub(self.offset);
		if logged > DUMP_WINDOW as u64 {
			writeln!(
				sink,
				"\n\nlog output truncated, check {} directly",
				self.path.display()
			)?;
		}
		sink.flush()
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicU32, Ordering};

	static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

	fn temp_log(name: &str) -> PathBuf {
		let n = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
		let dir = std::env::temp_dir().join(format!("respawn-capture-{}-{}", std::process::id(), n));
		let _ = std::fs::create_dir_all(&dir);
		dir.join(format!("{}.log", name))
	}

	#[test]
	fn open_records_end_offset() {
		let path = temp_log("offset");
		std::fs::write(&path, "previous run\n").unwrap();

		let mut capture = OutputCapture::new(&path);
		capture.open().unwrap();
		assert_eq!(capture.offset(), 13);
	}

	#[test]
	fn open_failure_leaves_state_untouched() {
		let mut capture = OutputCapture::new("/nonexistent-dir/respawn/out.log");
		assert!(capture.open().is_err());
		assert_eq!(capture.offset(), 0);
		assert!(capture.stdio().is_err());
	}

	#[test]
	fn dump_replays_only_this_run() {
		let path = temp_log("replay");
		std::fs::write(&path, "old noise\n").unwrap();

		let mut capture = OutputCapture::new(&path);
		capture.open().unwrap();
		{
			let mut f = OpenOptions::new().append(true).open(&path).unwrap();
			f.write_all(b"panic: listener failed\n").unwrap();
		}

		let mut out = Vec::new();
		capture.dump(&mut out).unwrap();
		let text = String::from_utf8(out).unwrap();
		assert!(text.starts_with("daemon output:\n"));
		assert!(text.contains("panic: listener failed"));
		assert!(!text.contains("old noise"));
		assert!(!text.contains("truncated"));
	}

	#[test]
	fn dump_warns_when_window_exceeded() {
		let path = temp_log("long");
		let mut capture = OutputCapture::new(&path);
		capture.open().unwrap();
		std::fs::write(&path, vec![b'#'; DUMP_WINDOW * 2]).unwrap();

		let mut out = Vec::new();
		capture.dump(&mut out).unwrap();
		let text = String::from_utf8(out).unwrap();
		assert_eq!(text.matches('#').count(), DUMP_WINDOW);
		assert!(text.contains("truncated"));
	}

	#[test]
	fn default_path_lives_in_tmp() {
		let path = OutputCapture::default_path();
		assert!(path.starts_with("/tmp"));
		assert_eq!(path.extension().and_then(|e| e.to_str()), Some("log"));
	}
}
