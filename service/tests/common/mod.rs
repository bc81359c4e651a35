#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::sync::{Arc, Condvar, Mutex};

use vosk_service_lib::{BundleDescriptor, CatalogError, HttpBody, Transport};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// A latch the fake body blocks on until it is opened.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
    }

    fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cv.wait(open).unwrap();
        }
    }
}

#[derive(Clone)]
pub struct Body {
    pub data: Vec<u8>,
    pub chunk: usize,
    pub declared_len: Option<u64>,
    pub fail_at: Option<usize>,
    pub pause_at: Option<(usize, Arc<Gate>)>,
}

impl Body {
    pub fn new(data: Vec<u8>, chunk: usize) -> Self {
        let len = data.len() as u64;
        Self {
            data,
            chunk,
            declared_len: Some(len),
            fail_at: None,
            pause_at: None,
        }
    }

    pub fn without_length(mut self) -> Self {
        self.declared_len = None;
        self
    }

    pub fn failing_at(mut self, offset: usize) -> Self {
        self.fail_at = Some(offset);
        self
    }

    pub fn pausing_at(mut self, offset: usize, gate: Arc<Gate>) -> Self {
        self.pause_at = Some((offset, gate));
        self
    }
}

#[derive(Clone)]
enum Route {
    Body(Body),
    Status(u16),
}

struct ChunkedReader {
    body: Body,
    pos: usize,
}

impl Read for ChunkedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if let Some((offset, gate)) = &self.body.pause_at {
            if self.pos >= *offset {
                gate.wait();
            }
        }
        if let Some(offset) = self.body.fail_at {
            if self.pos >= offset {
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionReset,
                    "connection reset by peer",
                ));
            }
        }

        let remaining = self.body.data.len() - self.pos;
        let n = remaining.min(self.body.chunk).min(buf.len());
        buf[..n].copy_from_slice(&self.body.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// In-memory stand-in for the HTTP client.
#[derive(Default)]
pub struct FakeTransport {
    routes: Mutex<HashMap<String, Route>>,
    hits: Mutex<Vec<String>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn serve(&self, url: &str, body: Body) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Route::Body(body));
    }

    pub fn serve_status(&self, url: &str, status: u16) {
        self.routes
            .lock()
            .unwrap()
            .insert(url.to_string(), Route::Status(status));
    }

    pub fn unserve(&self, url: &str) {
        self.routes.lock().unwrap().remove(url);
    }

    pub fn serve_catalog(&self, base: &str, bundles: &[BundleDescriptor]) {
        let json = serde_json::to_vec(bundles).unwrap();
        let len = json.len();
        self.serve(&format!("{base}model-list.json"), Body::new(json, len.max(1)));
    }

    pub fn hits(&self, url: &str) -> usize {
        self.hits.lock().unwrap().iter().filter(|u| *u == url).count()
    }
}

impl Transport for FakeTransport {
    fn get(&self, url: &str) -> Result<HttpBody, CatalogError> {
        self.hits.lock().unwrap().push(url.to_string());
        let route = self.routes.lock().unwrap().get(url).cloned();
        match route {
            Some(Route::Body(body)) => Ok(HttpBody {
                content_length: body.declared_len,
                reader: Box::new(ChunkedReader { body, pos: 0 }),
            }),
            Some(Route::Status(status)) => Err(CatalogError::Status {
                url: url.to_string(),
                status,
            }),
            None => Err(CatalogError::Request {
                url: url.to_string(),
                reason: "connection refused".to_string(),
            }),
        }
    }
}

pub const CATALOG_BASE: &str = "http://catalog.test/models/";

pub fn descriptor(name: &str, url: &str, size: u64) -> BundleDescriptor {
    BundleDescriptor {
        name: name.to_string(),
        language: "en-us".to_string(),
        language_label: "English".to_string(),
        checksum: String::new(),
        size_bytes: size,
        size_label: format!("{size} B"),
        kind: "small".to_string(),
        obsolete: false,
        source_url: url.to_string(),
        version: "0.15".to_string(),
    }
}

/// Entries are `(name, Some(contents))` for files and `(name, None)` for
/// directories.
pub fn build_zip(entries: &[(&str, Option<&[u8]>)]) -> Vec<u8> {
    build_zip_with_comment(entries, "")
}

fn build_zip_with_comment(entries: &[(&str, Option<&[u8]>)], comment: &str) -> Vec<u8> {
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut writer = ZipWriter::new(&mut cursor);
        for (name, contents) in entries {
            match contents {
                Some(bytes) => {
                    writer
                        .start_file(*name, SimpleFileOptions::default())
                        .unwrap();
                    writer.write_all(bytes).unwrap();
                }
                None => writer
                    .add_directory(*name, SimpleFileOptions::default())
                    .unwrap(),
            }
        }
        if !comment.is_empty() {
            writer.set_comment(comment);
        }
        writer.finish().unwrap();
    }
    cursor.into_inner()
}

/// Like [`build_zip`], padded through the archive comment so the length is a
/// multiple of `multiple`.
pub fn build_zip_padded(entries: &[(&str, Option<&[u8]>)], multiple: usize) -> Vec<u8> {
    let base = build_zip(entries);
    let pad = (multiple - base.len() % multiple) % multiple;
    if pad == 0 {
        return base;
    }
    let padded = build_zip_with_comment(entries, &"#".repeat(pad));
    assert_eq!(padded.len() % multiple, 0);
    padded
}
