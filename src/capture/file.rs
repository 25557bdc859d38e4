//! Seekable file source.
//!
//! Two backends share the seek machinery: synthetic `stub://` clips, and
//! recordings produced by this crate's own recorder (a JSON header line
//! followed by length-prefixed luma frames). Opening is fail-fast; a file
//! that cannot be fully indexed never yields a single frame.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::{CaptureSource, StubSpec};
use crate::error::PipelineError;
use crate::frame::Frame;

#[derive(Debug, Deserialize)]
struct ContainerHeader {
    format: String,
    version: u32,
    width: u32,
    height: u32,
    fps: f64,
}

enum FileBackend {
    Synthetic(StubSpec),
    Container {
        path: PathBuf,
        reader: BufReader<File>,
        header: ContainerHeader,
        /// Byte offset of each frame's length prefix.
        offsets: Vec<u64>,
    },
}

pub struct FileSource {
    backend: FileBackend,
    /// Index of the next frame `read_next` returns.
    next: u64,
}

impl FileSource {
    /// Open a clip. `stub://` URLs get a synthetic backend; anything else is
    /// treated as a recording container on disk.
    pub fn open(path: &str) -> Result<Self, PipelineError> {
        let backend = if path.starts_with("stub://") {
            FileBackend::Synthetic(StubSpec::parse(path)?)
        } else {
            Self::open_container(Path::new(path))?
        };
        Ok(Self { backend, next: 0 })
    }

    fn open_container(path: &Path) -> Result<FileBackend, PipelineError> {
        let file = File::open(path)
            .map_err(|e| PipelineError::Open(format!("{}: {}", path.display(), e)))?;
        let mut reader = BufReader::new(file);

        let mut header_line = Vec::new();
        let mut byte = [0u8; 1];
        loop {
            match reader.read(&mut byte) {
                Ok(0) => {
                    return Err(PipelineError::Open(format!(
                        "{}: truncated header",
                        path.display()
                    )))
                }
                Ok(_) if byte[0] == b'\n' => break,
                Ok(_) => header_line.push(byte[0]),
                Err(e) => return Err(PipelineError::Open(format!("{}: {}", path.display(), e))),
            }
            if header_line.len() > 4096 {
                return Err(PipelineError::Open(format!(
                    "{}: header line too long",
                    path.display()
                )));
            }
        }
        let header: ContainerHeader = serde_json::from_slice(&header_line)
            .map_err(|e| PipelineError::Open(format!("{}: bad header: {}", path.display(), e)))?;
        if header.format != "vigil-recording" || header.version != 1 {
            return Err(PipelineError::Open(format!(
                "{}: unsupported container '{}' v{}",
                path.display(),
                header.format,
                header.version
            )));
        }

        if header.width == 0
            || header.height == 0
            || header.width > 4096
            || header.height > 4096
        {
            return Err(PipelineError::Open(format!(
                "{}: implausible frame geometry {}x{}",
                path.display(),
                header.width,
                header.height
            )));
        }

        // Index every frame up front so seeks are O(1) and truncation is
        // caught at open time rather than mid-playback.
        let frame_len = header.width as u64 * header.height as u64;
        let mut offsets = Vec::new();
        let mut pos = (header_line.len() + 1) as u64;
        let end = reader
            .seek(SeekFrom::End(0))
            .map_err(|e| PipelineError::Open(format!("{}: {}", path.display(), e)))?;
        while pos < end {
            if pos + 4 > end {
                return Err(PipelineError::Open(format!(
                    "{}: truncated at frame {}",
                    path.display(),
                    offsets.len()
                )));
            }
            reader
                .seek(SeekFrom::Start(pos))
                .map_err(|e| PipelineError::Open(format!("{}: {}", path.display(), e)))?;
            let mut len_buf = [0u8; 4];
            reader
                .read_exact(&mut len_buf)
                .map_err(|e| PipelineError::Open(format!("{}: {}", path.display(), e)))?;
            let len = u32::from_le_bytes(len_buf) as u64;
            if len != frame_len || pos + 4 + len > end {
                return Err(PipelineError::Open(format!(
                    "{}: corrupt frame {} (len {})",
                    path.display(),
                    offsets.len(),
                    len
                )));
            }
            offsets.push(pos);
            pos += 4 + len;
        }

        Ok(FileBackend::Container {
            path: path.to_path_buf(),
            reader,
            header,
            offsets,
        })
    }
}

impl CaptureSource for FileSource {
    fn describe(&self) -> String {
        match &self.backend {
            FileBackend::Synthetic(spec) => format!("stub clip '{}'", spec.name),
            FileBackend::Container { path, .. } => format!("recording {}", path.display()),
        }
    }

    fn read_next(&mut self) -> Result<Frame, PipelineError> {
        match &mut self.backend {
            FileBackend::Synthetic(spec) => {
                if self.next >= spec.frames {
                    return Err(PipelineError::EndOfStream);
                }
                let frame = spec.render(self.next);
                self.next += 1;
                Ok(frame)
            }
            FileBackend::Container {
                path,
                reader,
                header,
                offsets,
            } => {
                let Some(&offset) = offsets.get(self.next as usize) else {
                    return Err(PipelineError::EndOfStream);
                };
                reader
                    .seek(SeekFrom::Start(offset + 4))
                    .map_err(|e| PipelineError::Read(format!("{}: {}", path.display(), e)))?;
                let mut data = vec![0u8; header.width as usize * header.height as usize];
                reader
                    .read_exact(&mut data)
                    .map_err(|e| PipelineError::Read(format!("{}: {}", path.display(), e)))?;
                self.next += 1;
                Ok(Frame::new(data, header.width, header.height))
            }
        }
    }

    fn is_seekable(&self) -> bool {
        true
    }

    fn frame_count(&self) -> Option<u64> {
        Some(match &self.backend {
            FileBackend::Synthetic(spec) => spec.frames,
            FileBackend::Container { offsets, .. } => offsets.len() as u64,
        })
    }

    fn frame_rate(&self) -> f64 {
        match &self.backend {
            FileBackend::Synthetic(spec) => spec.fps,
            FileBackend::Container { header, .. } => header.fps,
        }
    }

    fn frame_size(&self) -> (u32, u32) {
        match &self.backend {
            FileBackend::Synthetic(spec) => (spec.width, spec.height),
            FileBackend::Container { header, .. } => (header.width, header.height),
        }
    }

    fn seek(&mut self, index: u64) -> Result<(), PipelineError> {
        let count = self.frame_count().unwrap_or(0);
        if index >= count {
            return Err(PipelineError::Seek(format!(
                "frame {} out of range (0..{})",
                index, count
            )));
        }
        self.next = index;
        Ok(())
    }

    fn position(&self) -> u64 {
        self.next
    }
}
