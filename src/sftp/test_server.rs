//! In-process sftp server over a directory, for adapter tests
//!
//! Requests are served from a `TempDir` with `std::fs`. RENAME refuses an
//! existing destination and SYMLINK takes the target first, matching the
//! behaviour of OpenSSH's `sftp-server`. No extensions are advertised.

use super::SftpClient;
use russh_sftp::protocol::{
    Attrs, Data, File, FileAttributes, Handle, Name, OpenFlags, Status, StatusCode, Version,
};
use std::collections::HashMap;
use std::os::unix::fs::{FileExt, MetadataExt, PermissionsExt};
use std::path::{Path, PathBuf};

enum Open {
    File(std::fs::File),
    Dir { path: PathBuf, listed: bool },
}

struct DirServer {
    root: PathBuf,
    handles: HashMap<String, Open>,
    next_handle: u64,
}

fn status_of(err: &std::io::Error) -> StatusCode {
    match err.kind() {
        std::io::ErrorKind::NotFound => StatusCode::NoSuchFile,
        std::io::ErrorKind::PermissionDenied => StatusCode::PermissionDenied,
        _ => StatusCode::Failure,
    }
}

fn ok(id: u32) -> Status {
    Status {
        id,
        status_code: StatusCode::Ok,
        error_message: "Ok".to_string(),
        language_tag: "en-US".to_string(),
    }
}

fn attrs_of(metadata: &std::fs::Metadata) -> FileAttributes {
    FileAttributes {
        size: Some(metadata.size()),
        uid: Some(metadata.uid()),
        gid: Some(metadata.gid()),
        permissions: Some(metadata.mode()),
        atime: Some(u32::try_from(metadata.atime()).unwrap_or(0)),
        mtime: Some(u32::try_from(metadata.mtime()).unwrap_or(0)),
        ..FileAttributes::empty()
    }
}

impl DirServer {
    fn local(&self, path: &str) -> PathBuf {
        self.root.join(path.trim_start_matches('/'))
    }

    fn insert(&mut self, open: Open) -> String {
        self.next_handle += 1;
        let handle = format!("h{}", self.next_handle);
        self.handles.insert(handle.clone(), open);
        handle
    }
}

impl russh_sftp::server::Handler for DirServer {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn init(
        &mut self,
        _version: u32,
        _extensions: HashMap<String, String>,
    ) -> Result<Version, Self::Error> {
        Ok(Version::new())
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<Handle, Self::Error> {
        let file = std::fs::OpenOptions::new()
            .read(pflags.contains(OpenFlags::READ))
            .write(pflags.contains(OpenFlags::WRITE))
            .create(pflags.contains(OpenFlags::CREATE))
            .truncate(pflags.contains(OpenFlags::TRUNCATE))
            .open(self.local(&filename))
            .map_err(|e| status_of(&e))?;
        let handle = self.insert(Open::File(file));
        Ok(Handle { id, handle })
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        self.handles.remove(&handle);
        Ok(ok(id))
    }

    async fn read(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        len: u32,
    ) -> Result<Data, Self::Error> {
        let Some(Open::File(file)) = self.handles.get(&handle) else {
            return Err(StatusCode::Failure);
        };
        let mut data = vec![0u8; len as usize];
        let n = file.read_at(&mut data, offset).map_err(|e| status_of(&e))?;
        if n == 0 {
            return Err(StatusCode::Eof);
        }
        data.truncate(n);
        Ok(Data { id, data })
    }

    async fn write(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<Status, Self::Error> {
        let Some(Open::File(file)) = self.handles.get(&handle) else {
            return Err(StatusCode::Failure);
        };
        file.write_all_at(&data, offset).map_err(|e| status_of(&e))?;
        Ok(ok(id))
    }

    async fn lstat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let metadata = std::fs::symlink_metadata(self.local(&path)).map_err(|e| status_of(&e))?;
        Ok(Attrs {
            id,
            attrs: attrs_of(&metadata),
        })
    }

    async fn stat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        let metadata = std::fs::metadata(self.local(&path)).map_err(|e| status_of(&e))?;
        Ok(Attrs {
            id,
            attrs: attrs_of(&metadata),
        })
    }

    async fn setstat(
        &mut self,
        id: u32,
        path: String,
        attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        if let Some(mode) = attrs.permissions {
            std::fs::set_permissions(self.local(&path), std::fs::Permissions::from_mode(mode))
                .map_err(|e| status_of(&e))?;
        }
        Ok(ok(id))
    }

    async fn opendir(&mut self, id: u32, path: String) -> Result<Handle, Self::Error> {
        let local = self.local(&path);
        if !local.is_dir() {
            return Err(StatusCode::NoSuchFile);
        }
        let handle = self.insert(Open::Dir {
            path: local,
            listed: false,
        });
        Ok(Handle { id, handle })
    }

    async fn readdir(&mut self, id: u32, handle: String) -> Result<Name, Self::Error> {
        let Some(Open::Dir { path, listed }) = self.handles.get_mut(&handle) else {
            return Err(StatusCode::Failure);
        };
        if *listed {
            return Err(StatusCode::Eof);
        }
        *listed = true;

        let mut files = vec![
            File::new(".", FileAttributes::empty()),
            File::new("..", FileAttributes::empty()),
        ];
        for entry in std::fs::read_dir(&*path).map_err(|e| status_of(&e))? {
            let entry = entry.map_err(|e| status_of(&e))?;
            let metadata = entry.metadata().map_err(|e| status_of(&e))?;
            let name = entry.file_name().to_str().ok_or(StatusCode::Failure)?.to_string();
            files.push(File::new(name, attrs_of(&metadata)));
        }
        Ok(Name { id, files })
    }

    async fn remove(&mut self, id: u32, filename: String) -> Result<Status, Self::Error> {
        std::fs::remove_file(self.local(&filename)).map_err(|e| status_of(&e))?;
        Ok(ok(id))
    }

    async fn mkdir(
        &mut self,
        id: u32,
        path: String,
        _attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        std::fs::create_dir(self.local(&path)).map_err(|e| status_of(&e))?;
        Ok(ok(id))
    }

    async fn rename(
        &mut self,
        id: u32,
        oldpath: String,
        newpath: String,
    ) -> Result<Status, Self::Error> {
        let to = self.local(&newpath);
        if to.symlink_metadata().is_ok() {
            return Err(StatusCode::Failure);
        }
        std::fs::rename(self.local(&oldpath), to).map_err(|e| status_of(&e))?;
        Ok(ok(id))
    }

    async fn readlink(&mut self, id: u32, path: String) -> Result<Name, Self::Error> {
        let target = std::fs::read_link(self.local(&path)).map_err(|e| status_of(&e))?;
        let target = target.to_str().ok_or(StatusCode::Failure)?.to_string();
        Ok(Name {
            id,
            files: vec![File::new(target, FileAttributes::empty())],
        })
    }

    async fn symlink(
        &mut self,
        id: u32,
        target: String,
        link: String,
    ) -> Result<Status, Self::Error> {
        std::os::unix::fs::symlink(target, self.local(&link)).map_err(|e| status_of(&e))?;
        Ok(ok(id))
    }
}

/// Serve `root` over an in-memory stream and connect a client to it
pub(crate) async fn connect(root: &Path) -> SftpClient {
    let (client_end, server_end) = tokio::io::duplex(256 * 1024);
    let server = DirServer {
        root: root.to_path_buf(),
        handles: HashMap::new(),
        next_handle: 0,
    };
    tokio::spawn(russh_sftp::server::run(server_end, server));
    SftpClient::new(client_end)
        .await
        .expect("sftp handshake should succeed")
}
