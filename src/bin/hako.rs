//! CLI tool for running JavaScript files on the hako bridge
//!
//! Usage: hako [options] <entry-point.js>
//!
//! Options:
//!   --timeout <ms>          Interrupt execution after this many milliseconds
//!   --memory-limit <bytes>  Engine heap limit
//!   --config <file>         JSON file with `runtime`, `context` and `loader` options
//!   --compile <out>         Compile the entry point to bytecode instead of running it
//!   --bytecode              Treat the entry point as a bytecode file and run it
//!
//! Imports are resolved relative to the importing file; bare specifiers are
//! looked up in `node_modules`. Set `HAKO_LOG` (e.g. `HAKO_LOG=hako=debug`)
//! for bridge logging.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::{Duration, Instant};

use hako::{
    ContextOptions, Ctx, EvalFlags, Host, HostError, HostResult, LoaderOptions, ModuleRequest,
    ModuleSource, OwnedHandle, Runtime, RuntimeOptions,
};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

/// Minimal package.json representation for module resolution
#[derive(Deserialize)]
struct PackageJson {
    /// ESM entry point (preferred)
    module: Option<String>,
    /// CommonJS entry point
    main: Option<String>,
}

/// Contents of a `--config` file
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    runtime: RuntimeOptions,
    context: ContextOptions,
    loader: Option<LoaderOptions>,
}

fn main() {
    init_logging();
    if let Err(e) = run() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("HAKO_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

/// What to do with the entry point
enum Mode {
    Run,
    Compile(PathBuf),
    Bytecode,
}

/// CLI configuration
struct Config {
    entry_path: PathBuf,
    timeout_ms: Option<u64>,
    memory_limit: Option<usize>,
    config_file: Option<PathBuf>,
    mode: Mode,
}

fn parse_args() -> Result<Config, String> {
    let args: Vec<String> = env::args().collect();
    let program_name = args.first().map_or("hako", |s| s.as_str());

    let mut timeout_ms: Option<u64> = None;
    let mut memory_limit: Option<usize> = None;
    let mut config_file: Option<PathBuf> = None;
    let mut mode = Mode::Run;
    let mut entry_arg: Option<&str> = None;

    let mut i = 1;
    while i < args.len() {
        let Some(arg) = args.get(i) else {
            break;
        };
        if arg == "--timeout" {
            i += 1;
            timeout_ms = Some(
                args.get(i)
                    .ok_or_else(|| "--timeout requires a value".to_string())?
                    .parse::<u64>()
                    .map_err(|_| "--timeout must be a positive integer".to_string())?,
            );
        } else if arg == "--memory-limit" {
            i += 1;
            memory_limit = Some(
                args.get(i)
                    .ok_or_else(|| "--memory-limit requires a value".to_string())?
                    .parse::<usize>()
                    .map_err(|_| "--memory-limit must be a positive integer".to_string())?,
            );
        } else if arg == "--config" {
            i += 1;
            config_file = Some(PathBuf::from(
                args.get(i).ok_or_else(|| "--config requires a file".to_string())?,
            ));
        } else if arg == "--compile" {
            i += 1;
            let out = args.get(i).ok_or_else(|| "--compile requires an output file".to_string())?;
            mode = Mode::Compile(PathBuf::from(out));
        } else if arg == "--bytecode" {
            mode = Mode::Bytecode;
        } else if arg.starts_with('-') {
            return Err(format!("Unknown option: {}", arg));
        } else {
            entry_arg = Some(arg);
        }
        i += 1;
    }

    let entry_arg = entry_arg.ok_or_else(|| {
        format!(
            "Usage: {} [--timeout <ms>] [--memory-limit <bytes>] [--config <file>] \
             [--compile <out> | --bytecode] <entry-point.js>",
            program_name
        )
    })?;

    let entry_path = PathBuf::from(entry_arg);
    // Module names are absolute paths so relative imports resolve consistently
    let entry_path = if entry_path.is_absolute() {
        entry_path
    } else {
        env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(entry_path)
    };

    Ok(Config {
        entry_path,
        timeout_ms,
        memory_limit,
        config_file,
        mode,
    })
}

/// Host that loads modules from the filesystem and enforces the timeout
struct FsHost {
    deadline: Option<Instant>,
}

impl Host for FsHost {
    fn interrupt(&self) -> bool {
        self.deadline.is_some_and(|deadline| Instant::now() >= deadline)
    }

    fn normalize_module(&self, base: &str, specifier: &str) -> HostResult<String> {
        let base_dir = Path::new(base)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        let resolved = if is_bare(specifier) {
            resolve_node_module(specifier, &base_dir)
        } else {
            resolve_file_with_extensions(&base_dir.join(specifier))
        };
        let resolved = resolved.map_err(HostError::message)?;
        Ok(normalize_path(&resolved).display().to_string())
    }

    fn load_module<'js>(
        &self,
        _ctx: Ctx<'js>,
        request: ModuleRequest<'_>,
    ) -> HostResult<ModuleSource<'js>> {
        tracing::debug!(module = request.specifier, "loading module from disk");
        match fs::read_to_string(request.specifier) {
            Ok(source) => Ok(ModuleSource::Source(source)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(ModuleSource::NotFound),
            Err(e) => Err(HostError::message(format!(
                "Failed to load module '{}': {}",
                request.specifier, e
            ))),
        }
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = parse_args().map_err(|e| {
        eprintln!("{}", e);
        std::process::exit(1);
    })?;

    let mut file_config = match &config.config_file {
        Some(path) => {
            let content = fs::read_to_string(path)
                .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
            serde_json::from_str::<FileConfig>(&content)
                .map_err(|e| format!("Failed to parse {}: {}", path.display(), e))?
        }
        None => FileConfig::default(),
    };
    if config.memory_limit.is_some() {
        file_config.runtime.memory_limit = config.memory_limit;
    }

    let host = FsHost {
        deadline: config
            .timeout_ms
            .map(|ms| Instant::now() + Duration::from_millis(ms)),
    };
    let runtime = Runtime::new(Rc::new(host), &file_config.runtime)?;
    if config.timeout_ms.is_some() {
        runtime.enable_interrupt_handler();
    }
    runtime.enable_module_loader(file_config.loader.unwrap_or(LoaderOptions {
        custom_normalize: true,
        use_resolver: false,
    }));
    let context = runtime.context(&file_config.context)?;
    let ctx = context.ctx();

    let entry_path = &config.entry_path;
    let filename = entry_path.display().to_string();
    match &config.mode {
        Mode::Compile(out) => {
            let source = fs::read_to_string(entry_path)
                .map_err(|e| format!("Cannot read {}: {}", entry_path.display(), e))?;
            let bytes = ctx.compile_to_bytecode(&source, &filename, true, EvalFlags::GLOBAL)?;
            fs::write(out, &bytes).map_err(|e| format!("Cannot write {}: {}", out.display(), e))?;
            tracing::info!(out = %out.display(), len = bytes.len(), "bytecode written");
            return Ok(());
        }
        Mode::Bytecode => {
            let bytes = fs::read(entry_path)
                .map_err(|e| format!("Cannot read {}: {}", entry_path.display(), e))?;
            let result = ctx.evaluate_bytecode(&bytes, false)?.into_result()?;
            finish(&runtime, ctx, result, false)?;
        }
        Mode::Run => {
            let source = fs::read_to_string(entry_path)
                .map_err(|e| format!("Cannot read {}: {}", entry_path.display(), e))?;
            let flags = hako::eval::resolve_flags(&source, &filename, true, EvalFlags::GLOBAL);
            let result = ctx.eval(&source, &filename, false, flags)?.into_result()?;
            // A module's completion value is its namespace, which is not worth printing
            finish(&runtime, ctx, result, !flags.is_module())?;
        }
    }
    Ok(())
}

/// Drain remaining jobs, then optionally print the completion value
fn finish(
    runtime: &Runtime,
    ctx: Ctx<'_>,
    result: OwnedHandle<'_>,
    print: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let jobs = runtime.execute_pending_jobs(None)?;
    tracing::debug!(jobs, "job queue drained");
    if print {
        print_value(ctx, &result)?;
    }
    Ok(())
}

fn print_value(ctx: Ctx<'_>, value: &OwnedHandle<'_>) -> Result<(), Box<dyn std::error::Error>> {
    match ctx.type_of(value) {
        "undefined" => {}
        "function" => println!("[Function]"),
        "symbol" => println!("[Symbol]"),
        "object" if !ctx.is_error(value) => match ctx.to_json(value, 2)? {
            Some(json) => println!("{}", json),
            None => println!("{}", ctx.to_string(value)?),
        },
        _ => println!("{}", ctx.to_string(value)?),
    }
    Ok(())
}

fn is_bare(specifier: &str) -> bool {
    !(specifier.starts_with("./") || specifier.starts_with("../") || specifier.starts_with('/'))
}

/// Collapse `.` and `..` components so the same file always gets the same name
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// Parse a bare specifier into package name and optional subpath.
///
/// - "lodash" -> ("lodash", None)
/// - "lodash/fp" -> ("lodash", Some("fp"))
/// - "@scope/pkg/utils" -> ("@scope/pkg", Some("utils"))
fn parse_bare_specifier(specifier: &str) -> Result<(String, Option<String>), String> {
    if specifier.starts_with('@') {
        let mut parts = specifier.splitn(3, '/');
        let scope = parts.next().unwrap_or_default();
        let name = parts
            .next()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| format!("Invalid scoped package specifier: {}", specifier))?;
        Ok((format!("{}/{}", scope, name), parts.next().map(str::to_string)))
    } else {
        let mut parts = specifier.splitn(2, '/');
        let name = parts
            .next()
            .filter(|name| !name.is_empty())
            .ok_or_else(|| format!("Invalid package specifier: {}", specifier))?;
        Ok((name.to_string(), parts.next().map(str::to_string)))
    }
}

/// Resolve a file path: exact, then `.js`/`.mjs`, then a directory index
fn resolve_file_with_extensions(path: &Path) -> Result<PathBuf, String> {
    if path.extension().is_some() && path.is_file() {
        return Ok(path.to_path_buf());
    }
    for ext in ["js", "mjs"] {
        let with_ext = path.with_extension(ext);
        if with_ext.is_file() {
            return Ok(with_ext);
        }
    }
    for index in ["index.js", "index.mjs"] {
        let index_path = path.join(index);
        if index_path.is_file() {
            return Ok(index_path);
        }
    }
    Err(format!("Cannot resolve module path: {}", path.display()))
}

fn resolve_package_entry(package_dir: &Path, subpath: Option<&str>) -> Result<PathBuf, String> {
    if let Some(sub) = subpath {
        return resolve_file_with_extensions(&package_dir.join(sub));
    }
    let package_json_path = package_dir.join("package.json");
    if package_json_path.exists() {
        let content = fs::read_to_string(&package_json_path)
            .map_err(|e| format!("Cannot read {}: {}", package_json_path.display(), e))?;
        let pkg: PackageJson = serde_json::from_str(&content)
            .map_err(|e| format!("Failed to parse {}: {}", package_json_path.display(), e))?;
        let entry = pkg.module.or(pkg.main).unwrap_or_else(|| "index.js".to_string());
        return resolve_file_with_extensions(&package_dir.join(entry));
    }
    resolve_file_with_extensions(&package_dir.join("index"))
}

/// Walk up from `start_dir` looking for `node_modules/<package>`
fn resolve_node_module(specifier: &str, start_dir: &Path) -> Result<PathBuf, String> {
    let (package_name, subpath) = parse_bare_specifier(specifier)?;
    let mut searched_dirs = Vec::new();
    for dir in start_dir.ancestors() {
        let node_modules = dir.join("node_modules");
        let package_dir = node_modules.join(&package_name);
        if package_dir.is_dir() {
            return resolve_package_entry(&package_dir, subpath.as_deref());
        }
        searched_dirs.push(node_modules);
    }
    Err(format!(
        "Cannot find module '{}'\nSearched in:\n{}",
        specifier,
        searched_dirs
            .iter()
            .map(|p| format!("  - {}", p.display()))
            .collect::<Vec<_>>()
            .join("\n")
    ))
}
