//! Test helpers for integration tests
//!
//! Everything a test touches lives under one temp directory: uploads,
//! output, key file and scan roots. External tools are replaced by small
//! shell scripts on unix.

#![allow(dead_code)]

use audible_converter::ConverterConfig;
use std::fs;
use std::path::{Path, PathBuf};

/// Config rooted entirely inside `root`
///
/// Scan and verification roots point at empty directories and the key file
/// has no mirrors, so nothing outside `root` is read or written.
pub fn test_config(root: &Path) -> ConverterConfig {
    let scan = root.join("scan");
    let verify = root.join("verify");
    fs::create_dir_all(&scan).unwrap();
    fs::create_dir_all(&verify).unwrap();

    ConverterConfig {
        bind: "127.0.0.1:0".to_string(),
        upload_dir: root.join("uploads"),
        output_dir: root.join("output"),
        key_file: root.join("activation_bytes.txt"),
        key_mirrors: Vec::new(),
        ffmpeg_dir: root.join("ffmpeg"),
        audible_cli: Some(root.join("bin").join("audible").display().to_string()),
        scan_roots: Some(vec![scan]),
        verify_roots: Some(vec![verify]),
        ..ConverterConfig::default()
    }
}

pub fn scan_dir(root: &Path) -> PathBuf {
    root.join("scan")
}

pub fn verify_dir(root: &Path) -> PathBuf {
    root.join("verify")
}

/// Write `content` to `path`, creating parents
pub fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[cfg(unix)]
pub fn write_script(path: &Path, body: &str) {
    use std::os::unix::fs::PermissionsExt;

    write_file(path, &format!("#!/bin/sh\n{}\n", body));
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

/// audible-cli stand-in at the path [`test_config`] points to
///
/// `--version` always succeeds; `body` handles `activation-bytes`.
#[cfg(unix)]
pub fn install_audible_cli(root: &Path, body: &str) {
    write_script(
        &root.join("bin").join("audible"),
        &format!("if [ \"$1\" = '--version' ]; then echo 'audible-cli 0.3.1'; exit 0; fi\n{}", body),
    );
}

/// ffmpeg/ffprobe stand-ins in the bundled-tools directory of [`test_config`]
///
/// ffmpeg writes 1 MB to its output file and logs its arguments to
/// `ffmpeg_args.log`. ffprobe prints a 150 s duration and accepts any key.
#[cfg(unix)]
pub fn install_ffmpeg(root: &Path) {
    let dir = root.join("ffmpeg");
    let log = root.join("ffmpeg_args.log");
    write_script(
        &dir.join("ffmpeg"),
        &format!(
            "echo \"$@\" >> '{}'\nout=''\nprev=''\nfor a in \"$@\"; do\n  if [ \"$a\" = '-y' ]; then out=\"$prev\"; fi\n  prev=\"$a\"\ndone\nif [ -n \"$out\" ]; then head -c 1048576 /dev/zero > \"$out\"; fi",
            log.display()
        ),
    );
    write_script(&dir.join("ffprobe"), "echo 150.0");
}

/// Multipart body with the given `(name, filename, content)` parts
pub fn multipart_body(boundary: &str, parts: &[(&str, Option<&str>, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, filename, content) in parts {
        body.extend_from_slice(format!("--{}\r\n", boundary).as_bytes());
        match filename {
            Some(filename) => body.extend_from_slice(
                format!(
                    "Content-Disposition: form-data; name=\"{}\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                    name, filename
                )
                .as_bytes(),
            ),
            None => body.extend_from_slice(format!("Content-Disposition: form-data; name=\"{}\"\r\n\r\n", name).as_bytes()),
        }
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", boundary).as_bytes());
    body
}
