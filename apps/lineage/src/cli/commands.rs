//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use crate::api::{self, AppState, CodeJson, LineageJson, PersonJson, RegisterRequest};
use crate::config::{Backend, Settings};
use lineage_core::{
    ClassificationSeed, Dimension, EpochSpec, EraKind, GeographyCatalog, LineageError, Outbox,
    Outcome, Registry, RegistrySnapshot,
    epoch::list_codes,
    snapshot::MAX_SNAPSHOT_SIZE,
    snapshot_checksum,
};
use serde::Serialize;
use std::io::BufRead;
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum file size for registration input (10 MB).
const MAX_REGISTER_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Maximum registrations per input file.
const MAX_REGISTER_BATCH: usize = 10_000;

/// Maximum snapshot file size, as a file length.
const MAX_SNAPSHOT_FILE_SIZE: u64 = MAX_SNAPSHOT_SIZE as u64;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), LineageError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| LineageError::Io(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(LineageError::InputValidation(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Canonicalize an input path and check it names a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, LineageError> {
    let canonical = path.canonicalize().map_err(|e| {
        LineageError::Io(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(LineageError::Io(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Canonicalize the parent directory of an output path.
fn validate_output_path(path: &Path) -> Result<PathBuf, LineageError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        LineageError::Io(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(LineageError::Io(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| LineageError::Io("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

fn print_json(value: &impl Serialize) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(settings: &Settings) -> Result<(), LineageError> {
    let registry = load_registry(settings)?;
    let mut state = AppState::new(registry);
    if let Some(path) = &settings.outbox {
        state = state.with_outbox(Outbox::open(path)?);
    }

    println!("Lineage Registry Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:     {}", settings.host);
    println!("  Port:     {}", settings.port);
    println!("  Backend:  {}", settings.backend.name());
    println!("  Database: {:?}", settings.database);
    if let Some(outbox) = &settings.outbox {
        println!("  Outbox:   {:?}", outbox);
    }
    println!();
    println!("Endpoints:");
    println!("  POST /persons              - Register a person");
    println!("  GET  /persons/{{id}}         - Find a person");
    println!("  POST /auth/login           - Authenticate a living person");
    println!("  POST /codes/era            - Era code of a date");
    println!("  POST /codes/resolve        - Resolve a classification code");
    println!("  GET  /catalog/children     - Geography catalog");
    println!("  GET  /status               - Registry status");
    println!("  POST /export               - Export snapshot");
    println!("  GET  /health               - Health check");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let addr = format!("{}:{}", settings.host, settings.port);
    let registry = state.registry.clone();
    api::run_server(&addr, state, &settings.security).await?;
    save_registry(&registry, settings)
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show registry status.
pub fn cmd_status(settings: &Settings, json_mode: bool) -> Result<(), LineageError> {
    let registry = load_registry(settings)?;
    let metrics = registry.metrics()?;

    if json_mode {
        print_json(&api::StatusResponse::from_metrics(settings.backend.name(), metrics));
        return Ok(());
    }

    println!("Lineage Registry Status");
    println!("=======================");
    println!("Database: {:?}", settings.database);
    println!("Backend:  {}", settings.backend.name());
    println!();
    println!("Persons:        {}", metrics.persons);
    println!("  Living:       {}", metrics.living);
    println!("  Deceased:     {}", metrics.deceased);
    println!("Lineage roots:  {}", metrics.lineage_roots);
    println!("Prefixes:       {}", metrics.prefixes);
    println!();
    println!("Allocated codes:");
    for (dimension, count) in &metrics.allocated_codes {
        println!("  {:<10} {}", dimension.name(), count);
    }

    Ok(())
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize new database.
pub fn cmd_init(settings: &Settings, force: bool) -> Result<(), LineageError> {
    let db_path = &settings.database;
    if db_path.exists() {
        if !force {
            return Err(LineageError::InputValidation(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(db_path)
            .map_err(|e| LineageError::Io(format!("Remove existing database: {}", e)))?;
    }

    let registry = load_registry(settings)?;
    save_registry(&registry, settings)?;
    println!(
        "Initialized new {} database at {:?}",
        settings.backend.name(),
        db_path
    );

    Ok(())
}

// =============================================================================
// CODE COMMANDS
// =============================================================================

/// Era code of a date, or the first codes of a kind.
pub fn cmd_era(
    date: Option<&str>,
    kind: &str,
    list: Option<u16>,
    json_mode: bool,
) -> Result<(), LineageError> {
    let kind: EraKind = kind.parse()?;

    if let Some(max) = list {
        let spec = EpochSpec::for_kind(kind);
        for code in list_codes(kind, max) {
            println!("{:<5} from year {}", code.to_string(), spec.first_year_of(code.index()));
        }
        return Ok(());
    }

    let date = date.ok_or_else(|| {
        LineageError::InputValidation("a date (or --list) is required".to_string())
    })?;
    let code = EpochSpec::for_kind(kind)
        .code_for_str(date)
        .map(|code| code.to_string())
        .unwrap_or_default();

    if json_mode {
        print_json(&api::EraResponse { code });
    } else if code.is_empty() {
        println!("No code: '{}' is not a date", date);
    } else {
        println!("{}", code);
    }
    Ok(())
}

/// Resolve one label.
pub fn cmd_resolve(
    settings: &Settings,
    json_mode: bool,
    dimension: &str,
    label: &str,
) -> Result<(), LineageError> {
    let dimension: Dimension = dimension.parse()?;
    let registry = load_registry(settings)?;
    let resolution = registry.classifier().resolve(dimension, label)?;
    save_registry(&registry, settings)?;

    if json_mode {
        print_json(&CodeJson::from(resolution));
        return Ok(());
    }
    println!(
        "{} '{}' -> {} ({:?})",
        resolution.dimension, resolution.label, resolution.code, resolution.origin
    );
    Ok(())
}

/// List the codes of a dimension.
pub fn cmd_codes(
    settings: &Settings,
    json_mode: bool,
    dimension: &str,
) -> Result<(), LineageError> {
    let dimension: Dimension = dimension.parse()?;
    let registry = load_registry(settings)?;
    let codes = registry.classifier().codes(dimension)?;

    if json_mode {
        let codes: Vec<CodeJson> = codes.into_iter().map(CodeJson::from).collect();
        print_json(&codes);
        return Ok(());
    }

    println!("{} codes ({}):", dimension, codes.len());
    for resolution in codes {
        println!(
            "  {:<6} {} ({:?})",
            resolution.code.to_string(),
            resolution.label,
            resolution.origin
        );
    }
    Ok(())
}

// =============================================================================
// REGISTER & SYNC COMMANDS
// =============================================================================

/// Register every person in a JSON file, in order.
///
/// Parents must appear before their children. The first permanent failure
/// stops the batch; earlier registrations stay committed.
pub fn cmd_register(settings: &Settings, json_mode: bool, file: &Path) -> Result<(), LineageError> {
    let validated_path = validate_file_path(file)?;
    validate_file_size(&validated_path, MAX_REGISTER_FILE_SIZE)?;
    let contents = std::fs::read(&validated_path)
        .map_err(|e| LineageError::Io(format!("Read file: {}", e)))?;

    let requests = parse_register_file(&contents)?;
    tracing::info!(count = requests.len(), file = %validated_path.display(), "registering");

    let registry = load_registry(settings)?;
    let outbox = settings.outbox.as_deref().map(Outbox::open).transpose()?;

    let mut responses = Vec::with_capacity(requests.len());
    let mut failure = None;
    for request in requests {
        let outcome = request.into_registration().and_then(|request| match &outbox {
            Some(outbox) => registry.register_or_queue(request, outbox),
            None => registry.register(request).map(Outcome::Registered),
        });
        match outcome {
            Ok(Outcome::Registered(receipt)) => {
                responses.push(api::RegisterResponse::from_receipt(receipt));
            }
            Ok(Outcome::Queued { ticket }) => responses.push(api::RegisterResponse::queued(ticket)),
            Err(e) => {
                failure = Some(e);
                break;
            }
        }
    }
    save_registry(&registry, settings)?;

    if json_mode {
        print_json(&responses);
    } else {
        for response in &responses {
            match (&response.person, &response.ticket) {
                (Some(person), _) => println!(
                    "{:<9} {}  {} {}",
                    response.status, person.id, person.given_name, person.family_name
                ),
                (None, Some(ticket)) => println!("queued    ticket {}", ticket),
                (None, None) => {}
            }
            for gap in &response.gaps {
                println!(
                    "          note: {} '{}' has no curated code, using {}",
                    gap.dimension, gap.label, gap.code
                );
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// One request object or an array of them.
fn parse_register_file(contents: &[u8]) -> Result<Vec<RegisterRequest>, LineageError> {
    let value: serde_json::Value = serde_json::from_slice(contents)
        .map_err(|e| LineageError::InputValidation(format!("Invalid JSON: {}", e)))?;
    let requests: Vec<RegisterRequest> = match value {
        serde_json::Value::Array(_) => serde_json::from_value(value),
        other => serde_json::from_value(other).map(|request| vec![request]),
    }
    .map_err(|e| LineageError::InputValidation(format!("Invalid registration: {}", e)))?;

    if requests.len() > MAX_REGISTER_BATCH {
        return Err(LineageError::InputValidation(format!(
            "Registration count {} exceeds maximum allowed {}",
            requests.len(),
            MAX_REGISTER_BATCH
        )));
    }
    Ok(requests)
}

/// Replay queued registrations.
pub fn cmd_sync(settings: &Settings, json_mode: bool) -> Result<(), LineageError> {
    let path = settings.outbox.as_deref().ok_or_else(|| {
        LineageError::InputValidation(
            "no outbox configured (--outbox or [storage] outbox)".to_string(),
        )
    })?;
    let outbox = Outbox::open(path)?;
    let registry = load_registry(settings)?;
    let report = registry.reconcile(&outbox)?;
    save_registry(&registry, settings)?;

    if json_mode {
        print_json(&report);
        return Ok(());
    }
    for (ticket, id) in &report.registered {
        println!("registered {}  (ticket {})", id, ticket);
    }
    for (ticket, reason) in &report.rejected {
        println!("rejected   ticket {}: {}", ticket, reason);
    }
    println!(
        "{} registered, {} rejected, {} still queued",
        report.registered.len(),
        report.rejected.len(),
        report.pending
    );
    Ok(())
}

// =============================================================================
// LOOKUP COMMANDS
// =============================================================================

/// Which relatives to list.
#[derive(Debug, Clone, Copy)]
pub enum Walk {
    Children,
    Ancestors(usize),
    Descendants(usize),
}

/// Show one person.
pub fn cmd_show(settings: &Settings, json_mode: bool, id: &str) -> Result<(), LineageError> {
    let registry = load_registry(settings)?;
    let person = PersonJson::from(&registry.find_by_id(id)?);

    if json_mode {
        print_json(&person);
        return Ok(());
    }
    print_person(&person);
    Ok(())
}

fn print_person(person: &PersonJson) {
    println!("{}", person.id);
    println!("  Name:     {} {}", person.given_name, person.family_name);
    println!("  Kind:     {}", person.kind);
    println!("  Gender:   {}", person.gender);
    if let Some(birth) = person.birth_date {
        println!("  Born:     {}", birth);
    }
    if let Some(death) = person.death_date {
        println!("  Died:     {}", death);
    }
    println!("  Father:   {}", person.father.as_deref().unwrap_or("-"));
    println!("  Mother:   {}", person.mother.as_deref().unwrap_or("-"));
    println!("  Children: {}", person.children.len());
}

/// List children, ancestors or descendants.
pub fn cmd_relatives(
    settings: &Settings,
    json_mode: bool,
    id: &str,
    walk: Walk,
) -> Result<(), LineageError> {
    let registry = load_registry(settings)?;
    let person = registry.find_by_id(id)?;
    let graph = registry.graph();

    let relatives: Vec<LineageJson> = match walk {
        Walk::Children => graph
            .children(&person.id)?
            .iter()
            .map(|child| LineageJson {
                depth: 1,
                person: PersonJson::from(child),
            })
            .collect(),
        Walk::Ancestors(depth) => graph
            .ancestors(&person.id, depth)?
            .iter()
            .map(LineageJson::from)
            .collect(),
        Walk::Descendants(depth) => graph
            .descendants(&person.id, depth)?
            .iter()
            .map(LineageJson::from)
            .collect(),
    };

    if json_mode {
        print_json(&api::RelativesResponse {
            id: person.id.to_string(),
            relatives,
        });
        return Ok(());
    }

    if relatives.is_empty() {
        println!("{}: none", person.id);
    }
    for entry in &relatives {
        println!(
            "{}{}  {} {}",
            "  ".repeat(entry.depth),
            entry.person.id,
            entry.person.given_name,
            entry.person.family_name
        );
    }
    Ok(())
}

// =============================================================================
// LOGIN COMMAND
// =============================================================================

/// Check a living person's secret.
pub fn cmd_login(
    settings: &Settings,
    json_mode: bool,
    id: &str,
    secret: Option<String>,
) -> Result<(), LineageError> {
    let secret = match secret {
        Some(secret) => secret,
        None => {
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .map_err(|e| LineageError::Io(format!("Read secret: {}", e)))?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };

    let registry = load_registry(settings)?;
    let session = registry.authenticate(id, &secret)?;

    if json_mode {
        print_json(&api::LoginResponse::from(session));
        return Ok(());
    }
    println!(
        "Authenticated {} {} ({})",
        session.person.given_name, session.person.family_name, session.person.id
    );
    println!("Session token: {}", session.token);
    Ok(())
}

// =============================================================================
// CATALOG COMMAND
// =============================================================================

/// List the children of a geography node.
pub fn cmd_catalog(json_mode: bool, path: &str) -> Result<(), LineageError> {
    let catalog = GeographyCatalog::builtin();
    let path = path.trim().trim_matches('/');
    let level = catalog.level_of(path);
    if !path.is_empty() && level.is_none() {
        return Err(LineageError::InputValidation(format!(
            "catalog path '{}' not found",
            path
        )));
    }
    let children = catalog.children_of(path);

    if json_mode {
        print_json(&api::CatalogResponse {
            path: path.to_string(),
            level,
            entries: children.into_iter().cloned().collect(),
        });
        return Ok(());
    }

    let trail: Vec<&str> = catalog
        .trail(path)
        .into_iter()
        .map(|e| e.name.as_str())
        .collect();
    if let Some(level) = level {
        println!("{} ({})", trail.join(" > "), level);
    }
    for entry in children {
        println!("  {:<24} {} ({})", entry.path, entry.name, entry.level);
    }
    Ok(())
}

// =============================================================================
// EXPORT / IMPORT / HASH COMMANDS
// =============================================================================

/// Export the registry.
pub fn cmd_export(settings: &Settings, output: &Path, format: &str) -> Result<(), LineageError> {
    let validated_output = validate_output_path(output)?;
    let registry = load_registry(settings)?;

    let data = match format {
        "snapshot" => {
            let data = registry.export_snapshot()?;
            println!("Checksum: {}", snapshot_checksum(&data));
            data
        }
        "json" => {
            let snapshot = RegistrySnapshot::capture(registry.store())?;
            serde_json::to_vec_pretty(&snapshot)
                .map_err(|e| LineageError::Serialization(e.to_string()))?
        }
        _ => {
            return Err(LineageError::InputValidation(format!(
                "Unknown format: {}. Use: snapshot, json",
                format
            )));
        }
    };

    std::fs::write(&validated_output, &data)
        .map_err(|e| LineageError::Io(format!("Write file: {}", e)))?;

    println!("Exported {} bytes to {:?}", data.len(), validated_output);
    Ok(())
}

/// Import a snapshot into the configured registry.
pub fn cmd_import(settings: &Settings, input: &Path) -> Result<(), LineageError> {
    let validated_path = validate_file_path(input)?;
    validate_file_size(&validated_path, MAX_SNAPSHOT_FILE_SIZE)?;
    let data = std::fs::read(&validated_path)
        .map_err(|e| LineageError::Io(format!("Read file: {}", e)))?;

    let registry = load_registry(settings)?;
    let summary = registry.import_snapshot(&data)?;
    save_registry(&registry, settings)?;

    println!(
        "Imported {} persons, {} code allocations, {} counters, {} idempotency keys",
        summary.persons, summary.allocations, summary.counters, summary.idempotency_keys
    );
    Ok(())
}

/// BLAKE3 checksum of the registry snapshot.
pub fn cmd_hash(settings: &Settings, json_mode: bool) -> Result<(), LineageError> {
    let registry = load_registry(settings)?;
    let data = registry.export_snapshot()?;
    let checksum = snapshot_checksum(&data);

    if json_mode {
        print_json(&serde_json::json!({
            "checksum": checksum,
            "size": data.len(),
        }));
        return Ok(());
    }
    println!("{}", checksum);
    Ok(())
}

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

/// Open the registry for the configured backend.
///
/// The file backend reads a snapshot into memory; a missing file is an
/// empty registry.
pub fn load_registry(settings: &Settings) -> Result<Registry, LineageError> {
    let seed = ClassificationSeed::curated()?;
    match settings.backend {
        Backend::Redb => Registry::open(&settings.database, seed),
        Backend::File => {
            let registry = Registry::in_memory(seed)?;
            if settings.database.exists() {
                validate_file_size(&settings.database, MAX_SNAPSHOT_FILE_SIZE)?;
                let data = std::fs::read(&settings.database)
                    .map_err(|e| LineageError::Io(format!("Read db: {}", e)))?;
                registry.import_snapshot(&data)?;
            }
            Ok(registry)
        }
    }
}

/// Persist changes. A no-op for redb, which commits as it goes.
pub fn save_registry(registry: &Registry, settings: &Settings) -> Result<(), LineageError> {
    if registry.store().is_persistent() {
        return Ok(());
    }
    let data = registry.export_snapshot()?;
    std::fs::write(&settings.database, &data)
        .map_err(|e| LineageError::Io(format!("Write db: {}", e)))
}
