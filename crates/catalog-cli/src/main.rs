//! Catalog Gateway CLI
//!
//! Operator tooling for the catalog: create catalogs and sealing keys,
//! register services and assets, issue API keys and page through listings.

use catalog_gateway_api::{
    ApiKeyManager, EntityGateway, GatewayConfig, NoopAuthorizer, RedactionOutcome, SealingKey,
    SecretsManagerProvider,
};
use catalog_gateway_core::{
    validation, Connection, ConnectionConfig, DashboardConnection, DatabaseConnection, Entity,
    EntityType, Include, PageRequest, PipelineConnection, Principal, SecretValue,
    ServiceCategory, ServiceType, StorageConnection, DEFAULT_PAGE_LIMIT,
};
use catalog_gateway_storage::{backend_from_uri, DynCatalogBackend, SqliteEntityStore};
use clap::{Args, Parser, Subcommand};
use std::sync::Arc;
use tracing::debug;
use tracing_subscriber::EnvFilter;

type CliResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Parser)]
#[command(name = "catalog-gateway")]
#[command(version, about = "Catalog gateway CLI", long_about = None)]
struct Cli {
    /// Path to the catalog database
    #[arg(short, long, default_value = "catalog_gateway.db", global = true)]
    catalog: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new catalog
    Init {
        /// Overwrite existing catalog if it exists
        #[arg(short, long)]
        force: bool,
    },

    /// Generate a base64 sealing key for local secrets mode
    GenerateKey,

    /// Register a service with its connection; secrets are sealed before storing
    RegisterService(RegisterService),

    /// Register a data asset (table, dashboard, pipeline, container)
    RegisterAsset(RegisterAsset),

    /// Soft-delete an entity (or restore it)
    Delete {
        entity_type: String,
        name: String,
        /// Undo a previous delete
        #[arg(long)]
        restore: bool,
    },

    /// Create an API key for a principal; the key is printed once
    CreateApiKey {
        /// Principal name
        name: String,
        /// Comma-separated roles
        #[arg(short, long, value_delimiter = ',')]
        roles: Vec<String>,
        #[arg(long)]
        admin: bool,
        /// Automation account
        #[arg(long)]
        bot: bool,
    },

    /// List API keys (hashes are never shown)
    ListApiKeys,

    /// Revoke an API key by id
    RevokeApiKey {
        id: i64,
    },

    /// Page through a collection (trusted operator view, no authorization)
    List(ListArgs),
}

#[derive(Args)]
struct RegisterAsset {
    /// Entity type, e.g. table
    entity_type: String,
    name: String,
    /// Producing service name
    #[arg(short, long)]
    service: Option<String>,
    #[arg(short, long)]
    owner: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    domain: Option<String>,
    /// Comma-separated tags
    #[arg(long, value_delimiter = ',')]
    tags: Vec<String>,
}

#[derive(Args)]
struct ListArgs {
    /// Collection name, e.g. tables or databaseServices
    collection: String,
    /// Comma-separated optional fields
    #[arg(short, long, value_delimiter = ',')]
    fields: Vec<String>,
    #[arg(short, long)]
    service: Option<String>,
    #[arg(short, long, default_value_t = DEFAULT_PAGE_LIMIT)]
    limit: usize,
    /// all, deleted or non-deleted
    #[arg(short, long, default_value = "non-deleted")]
    include: String,
    #[arg(long, conflicts_with = "before")]
    after: Option<String>,
    #[arg(long)]
    before: Option<String>,
    /// Follow `after` cursors until the end of the collection
    #[arg(long, conflicts_with = "before")]
    all: bool,
    /// Print entities as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct RegisterService {
    /// Service type, e.g. Postgres, Looker, Airflow, S3
    service_type: String,
    name: String,
    /// Host and port (database, dashboard and pipeline services)
    #[arg(long)]
    host_port: Option<String>,
    /// Username, client id or access key id depending on the service category
    #[arg(short, long)]
    username: Option<String>,
    /// Password, client secret, token or secret access key
    #[arg(long)]
    secret: Option<String>,
    /// Default database (database services)
    #[arg(long)]
    database: Option<String>,
    /// Region (storage services)
    #[arg(long)]
    region: Option<String>,
    #[arg(short, long)]
    owner: Option<String>,
    #[arg(long)]
    description: Option<String>,
    #[arg(long)]
    domain: Option<String>,
    #[arg(long, value_delimiter = ',')]
    tags: Vec<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { force } => init_catalog(&cli.catalog, force).await,
        Commands::GenerateKey => generate_key(),
        Commands::RegisterService(args) => register_service(&cli.catalog, args).await,
        Commands::RegisterAsset(args) => register_asset(&cli.catalog, args).await,
        Commands::Delete {
            entity_type,
            name,
            restore,
        } => delete_entity(&cli.catalog, &entity_type, &name, restore).await,
        Commands::CreateApiKey {
            name,
            roles,
            admin,
            bot,
        } => create_api_key(&cli.catalog, name, roles, admin, bot).await,
        Commands::ListApiKeys => list_api_keys(&cli.catalog).await,
        Commands::RevokeApiKey { id } => revoke_api_key(&cli.catalog, id).await,
        Commands::List(args) => list_entities(&cli.catalog, args).await,
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn open_backend(path: &str) -> Result<Arc<DynCatalogBackend>, Box<dyn std::error::Error>> {
    Ok(Arc::from(backend_from_uri(path)?))
}

/// Secrets provider configured from the `CATALOG_GATEWAY_SECRETS_*` variables.
fn secrets_provider() -> Result<Arc<SecretsManagerProvider>, Box<dyn std::error::Error>> {
    let config = GatewayConfig::from_env()?;
    Ok(Arc::new(SecretsManagerProvider::from_config(&config)))
}

fn non_empty(values: Vec<String>) -> Option<Vec<String>> {
    (!values.is_empty()).then_some(values)
}

async fn init_catalog(path: &str, force: bool) -> CliResult {
    let backend = backend_from_uri(path)?;

    if backend.exists().await? {
        if !force {
            return Err(format!(
                "Catalog already exists at '{}'. Use --force to overwrite.",
                path
            )
            .into());
        }
        println!("Removing existing catalog at '{}'", path);
        std::fs::remove_file(path)?;
    }

    backend.initialize().await?;
    println!("Initialized catalog at '{}'", path);

    Ok(())
}

fn generate_key() -> CliResult {
    println!("{}", SealingKey::generate().to_base64());
    eprintln!("Set it as CATALOG_GATEWAY_SECRETS_KEY; losing it makes sealed secrets unreadable.");
    Ok(())
}

fn parse_asset_type(raw: &str) -> Result<EntityType, Box<dyn std::error::Error>> {
    let entity_type: EntityType = raw.parse()?;
    if entity_type.is_service() {
        return Err(format!("'{}' is a service type; use register-service", raw).into());
    }
    Ok(entity_type)
}

fn connection_config(
    category: ServiceCategory,
    args: &RegisterService,
) -> Result<ConnectionConfig, Box<dyn std::error::Error>> {
    let host_port = || {
        args.host_port
            .clone()
            .ok_or_else(|| format!("--host-port is required for {} services", category))
    };
    let secret = args.secret.clone().map(SecretValue::new);

    Ok(match category {
        ServiceCategory::Database => ConnectionConfig::Database(DatabaseConnection {
            host_port: host_port()?,
            username: args
                .username
                .clone()
                .ok_or("--username is required for database services")?,
            password: secret,
            database: args.database.clone(),
        }),
        ServiceCategory::Dashboard => ConnectionConfig::Dashboard(DashboardConnection {
            host_port: host_port()?,
            client_id: args.username.clone(),
            client_secret: secret,
        }),
        ServiceCategory::Pipeline => ConnectionConfig::Pipeline(PipelineConnection {
            host_port: host_port()?,
            token: secret,
        }),
        ServiceCategory::Storage => ConnectionConfig::Storage(StorageConnection {
            region: args.region.clone(),
            access_key_id: args.username.clone(),
            secret_access_key: secret,
        }),
    })
}

async fn register_service(path: &str, args: RegisterService) -> CliResult {
    let service_type: ServiceType = args.service_type.parse()?;
    let category = service_type.category();
    validation::validate_entity_name(&args.name)?;

    let config = connection_config(category, &args)?;
    let manager = secrets_provider()?.get()?;
    let sealed = manager.encrypt(config, service_type, &args.name)?;

    let mut entity = Entity::new(category.entity_type(), args.name);
    entity.service = Some(service_type.to_string());
    entity.owner = args.owner;
    entity.description = args.description;
    entity.domain = args.domain;
    entity.tags = non_empty(args.tags);
    entity.connection = Some(Connection::new(service_type, sealed)?);

    register(path, entity).await?;
    println!("Secrets sealed with the {} secrets manager", manager.name());
    Ok(())
}

async fn register_asset(path: &str, args: RegisterAsset) -> CliResult {
    let mut entity = Entity::new(parse_asset_type(&args.entity_type)?, args.name);
    entity.service = args.service;
    entity.owner = args.owner;
    entity.description = args.description;
    entity.domain = args.domain;
    entity.tags = non_empty(args.tags);
    register(path, entity).await
}

async fn register(path: &str, entity: Entity) -> CliResult {
    let store = SqliteEntityStore::new(open_backend(path)?);
    debug!(entity_type = %entity.entity_type, name = %entity.name, "Registering entity");
    store.create(&entity).await?;
    println!(
        "Registered {} '{}' ({})",
        entity.entity_type, entity.name, entity.id
    );
    Ok(())
}

async fn delete_entity(path: &str, entity_type: &str, name: &str, restore: bool) -> CliResult {
    let entity_type: EntityType = entity_type.parse()?;
    let store = SqliteEntityStore::new(open_backend(path)?);

    if restore {
        store.restore(entity_type, name).await?;
        println!("Restored {} '{}'", entity_type, name);
    } else {
        store.soft_delete(entity_type, name).await?;
        println!("Deleted {} '{}'", entity_type, name);
    }
    Ok(())
}

async fn create_api_key(
    path: &str,
    name: String,
    roles: Vec<String>,
    admin: bool,
    bot: bool,
) -> CliResult {
    validation::validate_identifier(&name, "name")?;
    let mut principal = Principal::user(name).with_roles(roles);
    principal.is_admin = admin;
    principal.is_bot = bot;

    let manager = ApiKeyManager::new(open_backend(path)?);
    let key = manager.create_key(&principal).await?;

    println!("{}", key);
    eprintln!(
        "API key for '{}' created. Store it now; it cannot be shown again.",
        principal.name
    );
    Ok(())
}

async fn list_api_keys(path: &str) -> CliResult {
    let manager = ApiKeyManager::new(open_backend(path)?);
    let keys = manager.list_keys().await?;

    if keys.is_empty() {
        println!("No API keys");
        return Ok(());
    }

    for key in &keys {
        print!("  {} {}", key.id, key.name);
        if key.is_admin {
            print!(" (admin)");
        }
        if !key.roles.is_empty() {
            print!(" roles: {}", key.roles.join(","));
        }
        print!(" created: {}", key.created_at);
        if let Some(last_used) = &key.last_used_at {
            print!(" last used: {}", last_used);
        }
        if let Some(revoked) = &key.revoked_at {
            print!(" REVOKED {}", revoked);
        }
        println!();
    }
    Ok(())
}

async fn revoke_api_key(path: &str, id: i64) -> CliResult {
    let manager = ApiKeyManager::new(open_backend(path)?);
    if !manager.revoke_key(id).await? {
        return Err(format!("No active API key with id {}", id).into());
    }
    println!("Revoked API key {}", id);
    Ok(())
}

fn page_request(args: &ListArgs) -> Result<PageRequest, Box<dyn std::error::Error>> {
    let entity_type = EntityType::from_collection(&args.collection)
        .ok_or_else(|| format!("Unknown collection '{}'", args.collection))?;

    let mut request = PageRequest::new(entity_type)
        .with_fields(args.fields.iter())
        .with_limit(args.limit)
        .with_include(args.include.parse::<Include>()?);
    request.service = args.service.clone();
    request.after = args.after.clone();
    request.before = args.before.clone();
    Ok(request)
}

async fn list_entities(path: &str, args: ListArgs) -> CliResult {
    let mut request = page_request(&args)?;
    let (all, json) = (args.all, args.json);

    let backend = open_backend(path)?;
    let store = Arc::new(SqliteEntityStore::new(backend));
    let gateway = EntityGateway::new(store.clone(), Arc::new(NoopAuthorizer), secrets_provider()?);
    let operator = Principal::admin("cli");

    let mut total = 0;
    loop {
        let page = gateway.list_entities(&operator, &request).await?;
        total += page.items.len();

        for item in &page.items {
            if json {
                println!("{}", serde_json::to_string(item)?);
                continue;
            }
            let entity = &item.entity;
            print!("  {} {}", entity.name, entity.id);
            if let Some(service) = &entity.service {
                print!(" [{}]", service);
            }
            if entity.deleted {
                print!(" (deleted)");
            }
            if item.redaction != RedactionOutcome::Withheld {
                print!(" connection: {}", item.redaction.as_str());
            }
            println!();
        }

        match page.after {
            Some(after) if all => {
                request.before = None;
                request.after = Some(after);
            }
            after => {
                if !json {
                    if let Some(before) = page.before {
                        println!("before: {}", before);
                    }
                    if let Some(after) = after {
                        println!("after: {}", after);
                    }
                }
                break;
            }
        }
    }

    if !json {
        let stored = store.count(request.entity_type, request.include).await?;
        println!(
            "{} of {} {} ({})",
            total,
            stored,
            request.entity_type.collection(),
            request.include
        );
    }
    Ok(())
}
