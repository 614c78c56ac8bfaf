//! Client for the replay/mutation server.
//!
//! The server keeps the mutations a fuzzer produced for each run and the
//! paths crash artifacts should be written to. Messages are JSON, one per
//! line, over a Unix stream socket.

use log::debug;
use serde_derive::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::error::{Error, Result};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum Request {
    RegisterPid { run_id: Uuid, pid: u32, tracing: bool },
    CrashPaths { pid: u32 },
    Replay { run_id: Uuid, index: u32, size: u64 },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    CrashPaths {
        crash_path: PathBuf,
        mem_dump_path: PathBuf,
    },
    Mutation {
        bytes: Vec<u8>,
    },
    Error {
        message: String,
    },
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct CrashPaths {
    pub crash_path: PathBuf,
    pub mem_dump_path: PathBuf,
}

pub trait ReplayServer: Send {
    fn register_pid(&mut self, run_id: Uuid, pid: u32, tracing: bool) -> Result<()>;

    fn crash_paths(&mut self, pid: u32) -> Result<CrashPaths>;

    /// Recorded mutation for the `index`th targeted call of a run
    fn replay(&mut self, run_id: Uuid, index: u32, size: u64) -> Result<Vec<u8>>;
}

pub struct SocketServer {
    path: PathBuf,
    reader: BufReader<UnixStream>,
    writer: UnixStream,
}

impl SocketServer {
    pub fn connect<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let stream = UnixStream::connect(&path).map_err(|source| Error::Server {
            path: path.clone(),
            source,
        })?;
        Self::from_stream(path, stream)
    }

    /// Use an already connected stream. `path` is only used in errors.
    pub fn from_stream(path: PathBuf, stream: UnixStream) -> Result<Self> {
        let writer = stream.try_clone().map_err(|source| Error::Server {
            path: path.clone(),
            source,
        })?;
        Ok(Self {
            path,
            reader: BufReader::new(stream),
            writer,
        })
    }

    fn io_error(&self, source: std::io::Error) -> Error {
        Error::Server {
            path: self.path.clone(),
            source,
        }
    }

    pub fn request(&mut self, request: &Request) -> Result<Response> {
        let mut line = serde_json::to_string(request)?;
        line.push('\n');
        debug!("-> {}", line.trim_end());
        self.writer
            .write_all(line.as_bytes())
            .map_err(|e| self.io_error(e))?;

        let mut reply = String::new();
        let n = self
            .reader
            .read_line(&mut reply)
            .map_err(|e| self.io_error(e))?;
        if n == 0 {
            return Err(Error::Protocol("connection closed".to_string()));
        }
        debug!("<- {}", reply.trim_end());

        match serde_json::from_str(&reply)? {
            Response::Error { message } => Err(Error::Protocol(message)),
            response => Ok(response),
        }
    }
}

fn unexpected(response: Response) -> Error {
    Error::Protocol(format!("unexpected response {:?}", response))
}

impl ReplayServer for SocketServer {
    fn register_pid(&mut self, run_id: Uuid, pid: u32, tracing: bool) -> Result<()> {
        match self.request(&Request::RegisterPid {
            run_id,
            pid,
            tracing,
        })? {
            Response::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    fn crash_paths(&mut self, pid: u32) -> Result<CrashPaths> {
        match self.request(&Request::CrashPaths { pid })? {
            Response::CrashPaths {
                crash_path,
                mem_dump_path,
            } => Ok(CrashPaths {
                crash_path,
                mem_dump_path,
            }),
            other => Err(unexpected(other)),
        }
    }

    fn replay(&mut self, run_id: Uuid, index: u32, size: u64) -> Result<Vec<u8>> {
        match self.request(&Request::Replay {
            run_id,
            index,
            size,
        })? {
            Response::Mutation { bytes } => Ok(bytes),
            other => Err(unexpected(other)),
        }
    }
}
