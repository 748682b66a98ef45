//! Reference data compiler: copies a source resource to its target path.
//!
//! Speaks the persistent IPC protocol on stdio: answers the version query,
//! then serves build requests one at a time, appending the resource type to
//! the extension-less target path it is handed. Two directives are
//! recognised in the source text:
//!
//! - `@depends <path>`: report `<path>`, resolved against the source
//!   file's directory, as a build reference
//! - `@fail <message>`: fail the build with `<message>`

use assetforge::ipc::{BuildRequest, BuildResult, Message, VersionData};
use clap::Parser;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

const COMPILER_VERSION: u32 = 1;

#[derive(Parser)]
#[command(
    name = "copy-compiler",
    version,
    about = "Copies source resources to their target path"
)]
struct Opts {
    /// Run as a persistent worker speaking newline-delimited JSON on stdio.
    #[arg(long)]
    persistent: bool,
}

fn main() -> ExitCode {
    let opts = Opts::parse();
    if !opts.persistent {
        eprintln!("copy-compiler: only --persistent mode is supported");
        return ExitCode::from(2);
    }
    match serve() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("copy-compiler: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn serve() -> io::Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout().lock();
    for line in stdin.lock().lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let message = match Message::decode(&line) {
            Ok(message) => message,
            Err(err) => {
                eprintln!("copy-compiler: ignoring unreadable message: {}", err);
                continue;
            }
        };
        let reply = match message {
            Message::VersionQuery => Message::VersionData(VersionData {
                version: COMPILER_VERSION,
            }),
            Message::BuildRequest(request) => Message::BuildResult(compile(&request)),
            _ => continue,
        };
        let encoded = reply.encode().map_err(io::Error::other)?;
        stdout.write_all(encoded.as_bytes())?;
        stdout.flush()?;
    }
    Ok(())
}

fn compile(request: &BuildRequest) -> BuildResult {
    let source = Path::new(&request.source_path);
    let mut result = BuildResult {
        source_path: request.source_path.clone(),
        target_path: request.target_path.clone(),
        platform: request.platform.clone(),
        success: false,
        errors: Vec::new(),
        outputs: Vec::new(),
        references: Vec::new(),
    };

    let content = match fs::read_to_string(source) {
        Ok(content) => content,
        Err(err) => {
            result
                .errors
                .push(format!("cannot read {}: {}", source.display(), err));
            return result;
        }
    };

    let base = source.parent().unwrap_or_else(|| Path::new("."));
    for line in content.lines() {
        let line = line.trim();
        if let Some(path) = line.strip_prefix("@depends ") {
            result
                .references
                .push(base.join(path.trim()).display().to_string());
        } else if let Some(message) = line.strip_prefix("@fail") {
            result.errors.push(message.trim().to_string());
        }
    }
    if !result.errors.is_empty() {
        return result;
    }

    let output = match source.extension().and_then(|ext| ext.to_str()) {
        Some(ext) if !ext.is_empty() => PathBuf::from(format!("{}.{}", request.target_path, ext)),
        _ => PathBuf::from(&request.target_path),
    };
    if let Err(err) = fs::write(&output, content.as_bytes()) {
        result
            .errors
            .push(format!("cannot write {}: {}", output.display(), err));
        return result;
    }
    result.outputs.push(output.display().to_string());
    result.success = true;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn request(source: &Path, target: &Path) -> BuildRequest {
        BuildRequest {
            source_path: source.display().to_string(),
            target_path: target.display().to_string(),
            platform: "generic".to_string(),
        }
    }

    #[test]
    fn copies_and_appends_resource_type() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("bar.txt");
        fs::write(&source, "hello").unwrap();
        let target = tmp.path().join("18b0f2");

        let result = compile(&request(&source, &target));
        assert!(result.success);
        let output = tmp.path().join("18b0f2.txt");
        assert_eq!(result.outputs, vec![output.display().to_string()]);
        assert_eq!(fs::read_to_string(&output).unwrap(), "hello");
    }

    #[test]
    fn depends_directive_reports_references() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("bar.txt");
        fs::write(&source, "@depends baz.dep\nhello").unwrap();
        let target = tmp.path().join("18b0f2");

        let result = compile(&request(&source, &target));
        assert!(result.success);
        assert_eq!(
            result.references,
            vec![tmp.path().join("baz.dep").display().to_string()]
        );
    }

    #[test]
    fn fail_directive_fails_the_build() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("bar.txt");
        fs::write(&source, "@fail bad input").unwrap();
        let target = tmp.path().join("18b0f2");

        let result = compile(&request(&source, &target));
        assert!(!result.success);
        assert_eq!(result.errors, vec!["bad input".to_string()]);
        assert!(result.outputs.is_empty());
    }

    #[test]
    fn unreadable_source_fails_the_build() {
        let tmp = TempDir::new().unwrap();
        let source = tmp.path().join("missing.txt");
        let result = compile(&request(&source, &tmp.path().join("x")));
        assert!(!result.success);
        assert_eq!(result.errors.len(), 1);
    }
}
