use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use invoice_desk::config::{
    EffectiveConfig, default_repo_config_yaml, expand_tilde, load_effective_config,
};
use invoice_desk::export::{ExportFormat, ExportOptions, format_amount};
use invoice_desk::store::FsBlobStore;
use invoice_desk::store::atomic::atomic_write;
use invoice_desk::{Database, ErrorKind, InvoiceDesk, InvoiceError, InvoicePatch, telemetry};
use serde::Serialize;
use serde_json::json;
use tracing::debug;

const STATE_DIR: &str = ".invoice-desk";
const DATABASE_FILE: &str = "invoices.sqlite";
const UPLOADS_DIR: &str = "uploads";

#[derive(Debug)]
struct CliError {
    code: &'static str,
    message: String,
    status: u16,
}

impl CliError {
    fn new(code: &'static str, status: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status,
        }
    }

    fn io(code: &'static str, err: io::Error) -> Self {
        Self::new(code, 500, err.to_string())
    }
}

impl From<InvoiceError> for CliError {
    fn from(value: InvoiceError) -> Self {
        let code = match &value {
            InvoiceError::InvoiceNotFound { .. } => "invoice_not_found",
            InvoiceError::EndpointNotFound { .. } => "invoice_not_found",
            InvoiceError::EdgeNotFound { .. } => "attachment_not_found",
            InvoiceError::BlobNotFound { .. } => "file_not_found",
            InvoiceError::Validation(_) => "validation_error",
            InvoiceError::SelfReference { .. } => "self_reference",
            InvoiceError::DuplicateAttachment { .. } => "duplicate_attachment",
            InvoiceError::NothingToExport => "nothing_to_export",
            InvoiceError::Storage(_) => "storage_error",
            InvoiceError::Database(_) => "database_error",
        };
        Self::new(code, status_for(value.kind()), value.to_string())
    }
}

impl From<serde_json::Error> for CliError {
    fn from(value: serde_json::Error) -> Self {
        Self::new("json_error", 500, value.to_string())
    }
}

fn status_for(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::NotFound | ErrorKind::NothingToExport => 404,
        ErrorKind::Validation | ErrorKind::Conflict => 400,
        ErrorKind::StorageFailure => 500,
    }
}

#[derive(Parser, Debug)]
#[command(name = "invoice-desk")]
#[command(about = "Track uploaded invoices and export a categorized ledger")]
struct Cli {
    /// Use ~/.invoice-desk instead of ./.invoice-desk
    #[arg(long, global = true)]
    global: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Init,
    List(ListArgs),
    Show(IdArgs),
    Upload(UploadArgs),
    Update(UpdateArgs),
    Delete(IdArgs),
    File(FileArgs),
    Export(ExportArgs),
    AttachmentTargets,
    Attachments(IdArgs),
    Attach(EdgeArgs),
    Detach(EdgeArgs),
}

#[derive(Args, Debug)]
struct ListArgs {
    #[arg(long)]
    status: Option<String>,
}

#[derive(Args, Debug)]
struct IdArgs {
    id: String,
}

#[derive(Args, Debug)]
struct UploadArgs {
    path: PathBuf,
    /// Display name to record instead of the file's own name
    #[arg(long)]
    name: Option<String>,
}

#[derive(Args, Debug)]
struct UpdateArgs {
    id: String,
    /// JSON object with any of: category, amount, manual_attachment_labels, notes, status
    #[arg(long, conflicts_with = "stdin")]
    body: Option<String>,
    #[arg(long)]
    stdin: bool,
}

#[derive(Args, Debug)]
struct FileArgs {
    id: String,
    /// Write the content here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ExportArgs {
    #[arg(long, default_value = "csv")]
    format: String,
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct EdgeArgs {
    id: String,
    attachment_id: String,
}

#[derive(Debug, Clone)]
struct DeskPaths {
    root: PathBuf,
    database: PathBuf,
    uploads: PathBuf,
    config_target: PathBuf,
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let payload = json!({
                "error": {
                    "code": err.code,
                    "message": err.message,
                    "status": err.status,
                }
            });
            eprintln!("{payload}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), CliError> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().map_err(|err| CliError::io("cwd_error", err))?;
    let home = home_dir()?;
    let state_root = if cli.global {
        home.join(STATE_DIR)
    } else {
        cwd.join(STATE_DIR)
    };
    let repo_config = cwd.join(STATE_DIR).join("config.yml");
    let user_config = home.join(STATE_DIR).join("config.yml");
    let config = load_effective_config(Some(&repo_config), Some(&user_config))
        .map_err(|err| CliError::new("config_error", 500, err.to_string()))?;
    telemetry::init(&config.log);

    let paths = desk_paths(
        &home,
        state_root,
        repo_config,
        user_config,
        cli.global,
        &config,
    );
    debug!(root = %paths.root.display(), "resolved state directory");

    match cli.command {
        Command::Init => cmd_init(&paths),
        command => {
            require_initialized(&paths)?;
            let desk = open_desk(&paths)?;
            let result = dispatch(&desk, &config, &cwd, command);
            desk.close()?;
            result
        }
    }
}

fn dispatch(
    desk: &InvoiceDesk<FsBlobStore>,
    config: &EffectiveConfig,
    cwd: &Path,
    command: Command,
) -> Result<(), CliError> {
    match command {
        Command::Init => Ok(()),
        Command::List(args) => cmd_list(desk, args),
        Command::Show(args) => print_json(&desk.db().get_invoice(&args.id)?),
        Command::Upload(args) => cmd_upload(desk, config, args),
        Command::Update(args) => cmd_update(desk, args),
        Command::Delete(args) => cmd_delete(desk, args),
        Command::File(args) => cmd_file(desk, args),
        Command::Export(args) => cmd_export(desk, config, cwd, args),
        Command::AttachmentTargets => {
            let ids = desk.db().all_attachment_targets()?;
            print_json(&json!({ "attachment_ids": ids }))
        }
        Command::Attachments(args) => print_json(&desk.attachment_view(&args.id)?),
        Command::Attach(args) => {
            let edge = desk.db().add_attachment(&args.id, &args.attachment_id)?;
            print_json(&json!({
                "status": 201,
                "message": "attachment added",
                "edge": edge,
            }))
        }
        Command::Detach(args) => {
            desk.db().remove_attachment(&args.id, &args.attachment_id)?;
            print_json(&json!({ "status": 200, "message": "attachment removed" }))
        }
    }
}

fn cmd_init(paths: &DeskPaths) -> Result<(), CliError> {
    fs::create_dir_all(&paths.uploads).map_err(|err| CliError::io("mkdir_error", err))?;
    Database::open(&paths.database)?.close()?;
    let wrote_config = write_default_config(&paths.config_target)?;

    print_json(&json!({
        "status": "ok",
        "root": paths.root,
        "database": paths.database,
        "uploads": paths.uploads,
        "config": paths.config_target,
        "config_created": wrote_config,
    }))
}

fn cmd_list(desk: &InvoiceDesk<FsBlobStore>, args: ListArgs) -> Result<(), CliError> {
    let status = args.status.as_deref().filter(|status| !status.is_empty());
    print_json(&desk.list_with_flags(status)?)
}

fn cmd_upload(
    desk: &InvoiceDesk<FsBlobStore>,
    config: &EffectiveConfig,
    args: UploadArgs,
) -> Result<(), CliError> {
    let metadata = fs::metadata(&args.path).map_err(|err| {
        CliError::new(
            "no_file",
            400,
            format!("cannot read `{}`: {err}", args.path.display()),
        )
    })?;
    if !metadata.is_file() {
        return Err(CliError::new(
            "no_file",
            400,
            format!("`{}` is not a file", args.path.display()),
        ));
    }

    let filename = match &args.name {
        Some(name) => name.clone(),
        None => args
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
    };
    let accepted = config.upload_policy().check(&filename, metadata.len())?;
    let bytes = fs::read(&args.path).map_err(|err| CliError::io("read_error", err))?;

    let invoice = desk.upload(&accepted.display_name, &accepted.file_type, &bytes)?;
    print_json(&json!({
        "status": 201,
        "id": invoice.id,
        "filename": invoice.display_name,
        "invoice_status": invoice.status,
    }))
}

fn cmd_update(desk: &InvoiceDesk<FsBlobStore>, args: UpdateArgs) -> Result<(), CliError> {
    let body = if args.stdin {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .map_err(|err| CliError::io("stdin_error", err))?;
        buf
    } else {
        args.body.ok_or_else(|| {
            CliError::new("missing_body", 400, "expected --body <json> or --stdin")
        })?
    };

    let patch = InvoicePatch::from_json(&body)?;
    let invoice = desk.db().update_invoice(&args.id, &patch)?;
    print_json(&json!({
        "message": "invoice updated",
        "invoice": invoice,
    }))
}

fn cmd_delete(desk: &InvoiceDesk<FsBlobStore>, args: IdArgs) -> Result<(), CliError> {
    let removed = desk.delete(&args.id)?;
    print_json(&json!({
        "message": "invoice deleted",
        "id": removed.id,
    }))
}

fn cmd_file(desk: &InvoiceDesk<FsBlobStore>, args: FileArgs) -> Result<(), CliError> {
    let (invoice, bytes) = desk.read_file(&args.id)?;
    match args.output {
        Some(output) => {
            let target = if output.is_dir() {
                output.join(&invoice.display_name)
            } else {
                output
            };
            atomic_write(&target, &bytes).map_err(|err| CliError::io("write_error", err))?;
            print_json(&json!({
                "id": invoice.id,
                "filename": invoice.display_name,
                "path": target,
                "bytes": bytes.len(),
            }))
        }
        None => {
            let mut stdout = io::stdout().lock();
            stdout
                .write_all(&bytes)
                .and_then(|()| stdout.flush())
                .map_err(|err| CliError::io("write_error", err))
        }
    }
}

fn cmd_export(
    desk: &InvoiceDesk<FsBlobStore>,
    config: &EffectiveConfig,
    cwd: &Path,
    args: ExportArgs,
) -> Result<(), CliError> {
    let options = ExportOptions {
        format: ExportFormat::parse(&args.format)?,
        uncategorized_label: config.uncategorized_label.clone(),
    };
    let report = desk.export(&options)?;

    let dir = args.output_dir.unwrap_or_else(|| cwd.to_path_buf());
    let path = dir.join(&report.filename);
    atomic_write(&path, &report.bytes).map_err(|err| CliError::io("write_error", err))?;

    let categories = report
        .sections
        .iter()
        .map(|section| {
            json!({
                "category": section.category,
                "invoices": section.rows.len(),
                "subtotal": format_amount(section.subtotal),
            })
        })
        .collect::<Vec<_>>();
    let format_name = match options.format {
        ExportFormat::Csv => "csv",
        ExportFormat::Excel => "excel",
    };
    print_json(&json!({
        "status": "ok",
        "format": format_name,
        "filename": report.filename,
        "path": path,
        "bytes": report.bytes.len(),
        "invoice_count": report.invoice_count,
        "categories": categories,
        "grand_total": format_amount(report.grand_total),
    }))
}

fn desk_paths(
    home: &Path,
    state_root: PathBuf,
    repo_config: PathBuf,
    user_config: PathBuf,
    global: bool,
    config: &EffectiveConfig,
) -> DeskPaths {
    let data_root = config
        .data_dir
        .as_deref()
        .map(|dir| expand_tilde(dir, home))
        .unwrap_or_else(|| state_root.clone());
    let config_target = if global { user_config } else { repo_config };
    DeskPaths {
        database: data_root.join(DATABASE_FILE),
        uploads: data_root.join(UPLOADS_DIR),
        root: data_root,
        config_target,
    }
}

fn require_initialized(paths: &DeskPaths) -> Result<(), CliError> {
    if !paths.database.exists() || !paths.uploads.exists() {
        return Err(CliError::new(
            "not_initialized",
            500,
            format!(
                "no invoice store at `{}`; run `invoice-desk init`",
                paths.root.display()
            ),
        ));
    }
    Ok(())
}

fn open_desk(paths: &DeskPaths) -> Result<InvoiceDesk<FsBlobStore>, CliError> {
    let db = Database::open(&paths.database)?;
    Ok(InvoiceDesk::new(db, FsBlobStore::new(&paths.uploads)))
}

fn write_default_config(path: &Path) -> Result<bool, CliError> {
    if path.exists() {
        return Ok(false);
    }
    atomic_write(path, default_repo_config_yaml().as_bytes())
        .map_err(|err| CliError::io("write_error", err))?;
    Ok(true)
}

fn home_dir() -> Result<PathBuf, CliError> {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .ok_or_else(|| CliError::new("home_error", 500, "HOME environment variable is not set"))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<(), CliError> {
    let rendered = serde_json::to_string(value)?;
    println!("{rendered}");
    Ok(())
}
