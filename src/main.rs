//! consent-ledger operator CLI
//!
//! Every ledger command acts as the identity of the key file at
//! `ledger.key_path`; writes print their receipt once confirmed.

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use consent_ledger::config::{AppConfig, ContentStoreKind};
use consent_ledger::crypto::{EncryptionMetadata, FileEncryptor, MasterKey, SigningKey};
use consent_ledger::database::indexer::EventIndexer;
use consent_ledger::database::Database;
use consent_ledger::ledger::verify::verify_ledger_log_detailed;
use consent_ledger::ledger::{Identity, LedgerClient, PendingTransaction, Substrate, SystemClock};
use consent_ledger::policy::PolicyProposal;
use consent_ledger::signatures::{EntityType, NewSignature, SignerType};
use consent_ledger::verification::{
    ContentStore, HttpContentStore, HttpSignatureJudge, MemoryContentStore, SignatureSubmission,
    VerificationWorkflow,
};

#[derive(Parser)]
#[command(name = "consent-ledger")]
#[command(about = "Anchor encrypted consent signatures and vote on allocation policies")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate keys
    Keygen {
        #[command(subcommand)]
        kind: KeygenCommand,
    },
    /// Print the identity of the configured key
    Whoami,
    /// Anchor a signature record with an already-obtained judgment
    StoreSignature {
        #[command(flatten)]
        signer: SignerArgs,
        #[arg(long)]
        content_hash: String,
        #[arg(long)]
        verified: bool,
        #[arg(long)]
        confidence: u8,
    },
    /// Encrypt, upload, judge and anchor a signature image
    Anchor {
        #[arg(long)]
        image: PathBuf,
        #[command(flatten)]
        signer: SignerArgs,
        /// Where to write the encryption metadata
        #[arg(long)]
        metadata_out: Option<PathBuf>,
    },
    GetSignature {
        id: u64,
    },
    VerifyIntegrity {
        id: u64,
        content_hash: String,
    },
    /// Check, fetch and decrypt an anchored signature image
    Open {
        id: u64,
        content_hash: String,
        #[arg(long)]
        metadata: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    ChangeSignatureAdmin {
        new_admin: String,
    },
    RegisterOrg {
        identity: String,
        name: String,
        org_type: String,
    },
    UpdateOrg {
        identity: String,
        #[arg(long)]
        active: Option<bool>,
        #[arg(long)]
        can_vote: Option<bool>,
        #[arg(long)]
        can_propose: Option<bool>,
    },
    OrgInfo {
        identity: String,
    },
    Propose {
        #[arg(long)]
        title: String,
        #[arg(long)]
        description: String,
        #[arg(long)]
        organ_type: String,
        #[arg(long, default_value = "{}")]
        data: String,
    },
    Vote {
        policy_id: u64,
        /// true to support, false to oppose
        #[arg(action = ArgAction::Set)]
        support: bool,
    },
    Execute {
        policy_id: u64,
    },
    PolicyInfo {
        id: u64,
    },
    ActivePolicies {
        organ_type: String,
    },
    ChangePolicyAdmin {
        new_admin: String,
    },
    /// Encrypt a file locally with the master key
    Encrypt {
        input: PathBuf,
        #[arg(long)]
        entity_type: EntityType,
        #[arg(long)]
        entity_id: u64,
        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },
    /// Decrypt a file produced by `encrypt`
    Decrypt {
        input: PathBuf,
        #[arg(long)]
        metadata: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Verify the ledger log hash chain
    VerifyLog {
        path: Option<PathBuf>,
    },
    /// Replay the ledger into the SQLite read model
    Index,
    /// Query the SQLite read model
    Query {
        #[command(subcommand)]
        query: QueryCommand,
    },
}

#[derive(Subcommand)]
enum KeygenCommand {
    /// secp256k1 key for a ledger identity
    Identity {
        #[arg(long)]
        output: PathBuf,
    },
    /// base64 AES-256 master key
    MasterKey,
}

#[derive(Subcommand)]
enum QueryCommand {
    Entity {
        entity_type: EntityType,
        entity_id: u64,
    },
    Hospital {
        hospital_id: String,
    },
    Organ {
        organ_type: String,
    },
}

#[derive(clap::Args)]
struct SignerArgs {
    #[arg(long)]
    signer_name: String,
    #[arg(long, default_value = "SELF")]
    signer_type: SignerType,
    #[arg(long, default_value = "")]
    guardian_name: String,
    #[arg(long, default_value = "")]
    guardian_relation: String,
    #[arg(long)]
    entity_type: EntityType,
    #[arg(long)]
    entity_id: u64,
    #[arg(long)]
    hospital_id: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "consent_ledger=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Keygen { kind } => match kind {
            KeygenCommand::Identity { output } => {
                let key = SigningKey::generate();
                key.save(&output)?;
                println!("identity:   {}", key.identity());
                println!("public key: {}", key.public_key_hex());
            }
            KeygenCommand::MasterKey => {
                println!("{}", MasterKey::generate().to_base64());
            }
        },
        Commands::Whoami => {
            let key = operator_key(&config)?;
            println!("{}", key.identity());
        }
        Commands::StoreSignature {
            signer,
            content_hash,
            verified,
            confidence,
        } => {
            let client = open_client(&config).await?;
            let pending = client
                .store_signature(NewSignature {
                    content_hash,
                    signer_name: signer.signer_name,
                    signer_type: signer.signer_type,
                    guardian_name: signer.guardian_name,
                    guardian_relation: signer.guardian_relation,
                    entity_type: signer.entity_type,
                    entity_id: signer.entity_id,
                    hospital_id: signer.hospital_id,
                    is_verified: verified,
                    confidence_score: confidence,
                })
                .await?;
            confirm(pending).await?;
        }
        Commands::Anchor {
            image,
            signer,
            metadata_out,
        } => {
            let workflow = open_workflow(&config).await?;
            let bytes = std::fs::read(&image).with_context(|| format!("reading {:?}", image))?;
            let anchored = workflow
                .anchor(SignatureSubmission {
                    image: bytes,
                    file_name: file_name(&image)?,
                    signer_name: signer.signer_name,
                    signer_type: signer.signer_type,
                    guardian_name: signer.guardian_name,
                    guardian_relation: signer.guardian_relation,
                    entity_type: signer.entity_type,
                    entity_id: signer.entity_id,
                    hospital_id: signer.hospital_id,
                })
                .await?;

            let metadata_path = metadata_out
                .unwrap_or_else(|| PathBuf::from(format!("{}.meta.json", anchored.encrypted_file_name)));
            std::fs::write(&metadata_path, serde_json::to_string_pretty(&anchored.metadata)?)?;

            println!("record id:    {}", anchored.record_id);
            println!("content hash: {}", anchored.content_hash);
            println!(
                "judgment:     verified={} confidence={}",
                anchored.judgment.is_verified, anchored.judgment.confidence_score
            );
            println!("metadata:     {:?}", metadata_path);
        }
        Commands::GetSignature { id } => {
            let client = open_client(&config).await?;
            print_json(&client.get_signature(id).await?)?;
        }
        Commands::VerifyIntegrity { id, content_hash } => {
            let client = open_client(&config).await?;
            let intact = client.verify_signature_integrity(id, &content_hash).await?;
            println!("{}", if intact { "✅ intact" } else { "❌ mismatch" });
        }
        Commands::Open {
            id,
            content_hash,
            metadata,
            output,
        } => {
            let workflow = open_workflow(&config).await?;
            let metadata = read_metadata(&metadata)?;
            let decision = workflow.verify_and_open(id, &content_hash, &metadata).await?;

            if let Some(image) = &decision.image {
                std::fs::write(&output, image)?;
                println!("decrypted image written to {:?}", output);
            }
            println!("integrity: {}", decision.integrity_ok);
            println!("trusted:   {}", decision.trusted);
            for reason in &decision.reasons {
                println!("  - {}", reason);
            }
        }
        Commands::ChangeSignatureAdmin { new_admin } => {
            let client = open_client(&config).await?;
            confirm(client.change_signature_admin(parse_identity(&new_admin)?).await?).await?;
        }
        Commands::RegisterOrg {
            identity,
            name,
            org_type,
        } => {
            let client = open_client(&config).await?;
            let pending = client
                .register_organization(parse_identity(&identity)?, &name, &org_type)
                .await?;
            confirm(pending).await?;
        }
        Commands::UpdateOrg {
            identity,
            active,
            can_vote,
            can_propose,
        } => {
            let client = open_client(&config).await?;
            let identity = parse_identity(&identity)?;
            if let Some(active) = active {
                confirm(client.update_organization_status(identity.clone(), active).await?).await?;
            }
            if can_vote.is_some() || can_propose.is_some() {
                let current = client.organization_status(&identity).await?;
                let pending = client
                    .update_organization_capabilities(
                        identity,
                        can_vote.unwrap_or(current.can_vote),
                        can_propose.unwrap_or(current.can_propose),
                    )
                    .await?;
                confirm(pending).await?;
            }
        }
        Commands::OrgInfo { identity } => {
            let client = open_client(&config).await?;
            let identity = parse_identity(&identity)?;
            let status = client.organization_status(&identity).await?;
            println!("name:        {}", client.organization_name(&identity).await?);
            println!("type:        {}", client.organization_type(&identity).await?);
            println!("active:      {}", status.active);
            println!("can vote:    {}", status.can_vote);
            println!("can propose: {}", status.can_propose);
        }
        Commands::Propose {
            title,
            description,
            organ_type,
            data,
        } => {
            let client = open_client(&config).await?;
            let pending = client
                .propose_policy(PolicyProposal {
                    title,
                    description,
                    organ_type,
                    data,
                })
                .await?;
            confirm(pending).await?;
        }
        Commands::Vote { policy_id, support } => {
            let client = open_client(&config).await?;
            confirm(client.cast_vote(policy_id, support).await?).await?;
        }
        Commands::Execute { policy_id } => {
            let client = open_client(&config).await?;
            confirm(client.execute_policy(policy_id).await?).await?;
        }
        Commands::PolicyInfo { id } => {
            let client = open_client(&config).await?;
            let policy = client.policy(id).await?;
            println!("title:       {}", policy.title);
            println!("description: {}", policy.description);
            println!("organ type:  {}", policy.organ_type);
            println!("proposer:    {}", policy.proposer);
            println!("created:     {}", policy.created_at);
            println!("deadline:    {}", policy.voting_deadline);
            println!("votes:       {} yes / {} no", policy.yes_votes, policy.no_votes);
            println!("status:      {}", policy.status.as_str());
            println!("data:        {}", policy.data);
        }
        Commands::ActivePolicies { organ_type } => {
            let client = open_client(&config).await?;
            for id in client.active_policies(&organ_type).await {
                println!("{}: {}", id, client.policy_title(id).await?);
            }
        }
        Commands::ChangePolicyAdmin { new_admin } => {
            let client = open_client(&config).await?;
            confirm(client.change_policy_admin(parse_identity(&new_admin)?).await?).await?;
        }
        Commands::Encrypt {
            input,
            entity_type,
            entity_id,
            output_dir,
        } => {
            let encryptor = FileEncryptor::new(&config.master_key()?);
            let bytes = std::fs::read(&input).with_context(|| format!("reading {:?}", input))?;
            let encrypted = encryptor.encrypt(&bytes, &file_name(&input)?, entity_type, entity_id)?;

            let data_path = output_dir.join(&encrypted.encrypted_file_name);
            let meta_path = output_dir.join(format!("{}.meta.json", encrypted.encrypted_file_name));
            std::fs::write(&data_path, &encrypted.encrypted_data)?;
            std::fs::write(&meta_path, serde_json::to_string_pretty(&encrypted.metadata)?)?;
            println!("encrypted: {:?}", data_path);
            println!("metadata:  {:?}", meta_path);
        }
        Commands::Decrypt {
            input,
            metadata,
            output,
        } => {
            let encryptor = FileEncryptor::new(&config.master_key()?);
            let data = std::fs::read(&input).with_context(|| format!("reading {:?}", input))?;
            let plaintext = encryptor.decrypt(&data, &read_metadata(&metadata)?)?;
            std::fs::write(&output, plaintext)?;
            println!("decrypted: {:?}", output);
        }
        Commands::VerifyLog { path } => {
            let path = path.unwrap_or_else(|| config.ledger.path.clone());
            let result = verify_ledger_log_detailed(&path);
            println!("{}", result.summary());
            println!("{}", result.detailed_status());
            if !result.is_valid {
                std::process::exit(1);
            }
        }
        Commands::Index => {
            let client = open_client(&config).await?;
            let indexer = open_indexer(&config).await?;
            let indexed = indexer.sync(&client.substrate().history().await?).await?;
            println!("indexed {} new entries", indexed);
        }
        Commands::Query { query } => {
            let indexer = open_indexer(&config).await?;
            match query {
                QueryCommand::Entity {
                    entity_type,
                    entity_id,
                } => print_json(&indexer.signatures_for_entity(entity_type, entity_id).await?)?,
                QueryCommand::Hospital { hospital_id } => {
                    print_json(&indexer.signatures_for_hospital(&hospital_id).await?)?
                }
                QueryCommand::Organ { organ_type } => {
                    print_json(&indexer.policies_for_organ_type(&organ_type).await?)?
                }
            }
        }
    }

    Ok(())
}

fn operator_key(config: &AppConfig) -> Result<SigningKey> {
    SigningKey::load(&config.ledger.key_path).with_context(|| {
        format!(
            "loading operator key {:?} (create one with `keygen identity`)",
            config.ledger.key_path
        )
    })
}

async fn open_client(config: &AppConfig) -> Result<LedgerClient> {
    let key = operator_key(config)?;
    let caller = key.identity();
    let admin = config.admin_identity()?.unwrap_or_else(|| caller.clone());

    let substrate = Substrate::open(
        &config.ledger.path,
        admin,
        config.voting_params(),
        config.ledger.sync_writes,
        Arc::new(SystemClock),
    )
    .await?;
    info!("Acting as {}", caller);
    Ok(LedgerClient::new(substrate, caller))
}

async fn open_workflow(config: &AppConfig) -> Result<VerificationWorkflow> {
    let client = open_client(config).await?;
    let encryptor = FileEncryptor::new(&config.master_key()?);

    let store: Arc<dyn ContentStore> = match config.content_store.kind {
        ContentStoreKind::Memory => Arc::new(MemoryContentStore::new()),
        ContentStoreKind::Ipfs => Arc::new(HttpContentStore::new(
            &config.content_store.api_url,
            config.content_store.timeout(),
        )?),
    };
    let judge_url = config
        .judge
        .url
        .as_deref()
        .ok_or_else(|| anyhow!("judge.url is not configured"))?;
    let judge = Arc::new(HttpSignatureJudge::new(judge_url, config.judge.timeout())?);

    Ok(VerificationWorkflow::new(
        client,
        encryptor,
        store,
        judge,
        config.trust_policy()?,
    ))
}

async fn open_indexer(config: &AppConfig) -> Result<EventIndexer> {
    let database = Database::new(&config.database_url).await?;
    database.run_migrations().await?;
    Ok(EventIndexer::new(database.pool().clone()))
}

async fn confirm(pending: PendingTransaction) -> Result<()> {
    let tx_id = pending.tx_id();
    let receipt = pending
        .confirmed()
        .await
        .with_context(|| format!("transaction {}", tx_id))?;
    print_json(&receipt)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn parse_identity(value: &str) -> Result<Identity> {
    value
        .parse()
        .map_err(|e| anyhow!("invalid identity {}: {}", value, e))
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(str::to_string)
        .ok_or_else(|| anyhow!("{:?} has no usable file name", path))
}

fn read_metadata(path: &Path) -> Result<EncryptionMetadata> {
    let contents = std::fs::read_to_string(path).with_context(|| format!("reading {:?}", path))?;
    Ok(serde_json::from_str(&contents)?)
}
