use crate::chain::{ChainRpcClient, TransactionBroadcaster};
use crate::config::{load_config_file, ConfigFile};
use crate::cosign::{CosignOptions, Cosigner};
use crate::esr;
use crate::interfaces::{AbiProvider, CachingAbiProvider};
use crate::signer::CosignerIdentity;
use crate::tracing::LogFormat;
use crate::web::start_web_server;
use clap::{Parser, Subcommand};
use cosigner_primitives::crypto::PrivateKey;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(version = env!("COSIGNER_VERSION"))]
pub struct Cli {
    #[arg(long, env("COSIGNER_LOG_FORMAT"), value_enum, default_value_t, global = true)]
    pub log_format: LogFormat,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serves cosigning requests.
    Start(StartCmd),
    /// Prints the public key, in both formats, belonging to a private key.
    PublicKey(PublicKeyCmd),
    /// Prints a signing request as JSON without contacting the chain.
    Decode(DecodeCmd),
}

#[derive(Parser, Debug)]
pub struct StartCmd {
    /// Directory holding config.yaml.
    #[arg(long, env("COSIGNER_HOME_DIR"))]
    pub home_dir: String,
    /// Private key of the configured permission, in WIF or `PVT_K1_` form.
    /// This key should come from a secure secret storage.
    #[arg(long, env("COSIGNER_PRIVATE_KEY"), hide_env_values = true)]
    pub private_key: PrivateKey,
}

#[derive(Parser, Debug)]
pub struct PublicKeyCmd {
    #[arg(long, env("COSIGNER_PRIVATE_KEY"), hide_env_values = true)]
    pub private_key: PrivateKey,
}

#[derive(Parser, Debug)]
pub struct DecodeCmd {
    /// The encoded request, with or without its `esr:` scheme.
    pub request: String,
}

impl Cli {
    pub async fn run(self) -> anyhow::Result<()> {
        match self.command {
            Command::Start(start) => start.run().await,
            Command::PublicKey(cmd) => {
                let public_key = cmd.private_key.public_key();
                println!("{public_key}");
                if let Some(legacy) = public_key.to_legacy_string() {
                    println!("{legacy}");
                }
                Ok(())
            }
            Command::Decode(cmd) => {
                println!("{}", decode_to_json(&cmd.request)?);
                Ok(())
            }
        }
    }
}

fn decode_to_json(request: &str) -> anyhow::Result<String> {
    let request = esr::decode(request)?;
    let mut value = serde_json::to_value(&request)?;
    if let Ok(chain_id) = request.extract_chain_id() {
        value["resolved_chain_id"] = serde_json::Value::String(chain_id.as_hex());
    }
    Ok(serde_json::to_string_pretty(&value)?)
}

impl StartCmd {
    async fn run(self) -> anyhow::Result<()> {
        let home_dir = PathBuf::from(&self.home_dir);
        let config = load_config_file(&home_dir)?;
        let identity = Arc::new(CosignerIdentity::new(
            config.permission_level(),
            self.private_key,
        ));
        tracing::info!(
            target: "cosigner",
            version = env!("COSIGNER_VERSION"),
            commit = env!("COSIGNER_COMMIT"),
            permission = %identity.permission(),
            public_key = %identity.public_key(),
            api_url = %config.chain.api_url,
            "starting cosigner"
        );

        let client = ChainRpcClient::new(&config.chain)?;
        match &config.abi_cache {
            Some(cache) => {
                let abi_provider = CachingAbiProvider::new(client.clone(), cache);
                serve(&config, identity, abi_provider, client).await
            }
            None => serve(&config, identity, client.clone(), client).await,
        }
    }
}

async fn serve<A, B>(
    config: &ConfigFile,
    identity: Arc<CosignerIdentity>,
    abi_provider: A,
    broadcaster: B,
) -> anyhow::Result<()>
where
    A: AbiProvider + Send + Sync + 'static,
    B: TransactionBroadcaster + Send + Sync + 'static,
{
    let cosigner = Arc::new(Cosigner::new(
        identity,
        abi_provider,
        broadcaster,
        CosignOptions {
            verify_transaction_id: config.verify_transaction_id,
        },
    ));
    let web_server = start_web_server(config.web_ui.clone(), cosigner).await?;
    web_server.await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::esr::testing::cosign_request;
    use crate::esr::ChainIdVariant;

    #[test]
    fn test_parse_start() {
        let cli = Cli::try_parse_from([
            "cosigner",
            "start",
            "--home-dir",
            "/tmp/cosigner",
            "--private-key",
            crate::signer::testing::COSIGNER_WIF,
        ])
        .unwrap();
        assert_eq!(cli.log_format, LogFormat::Plain);
        let Command::Start(start) = cli.command else {
            panic!("expected start");
        };
        assert_eq!(start.home_dir, "/tmp/cosigner");
        assert_eq!(
            start.private_key.public_key().to_legacy_string().as_deref(),
            Some(crate::signer::testing::COSIGNER_PUBLIC_KEY)
        );
    }

    #[test]
    fn test_rejects_bad_private_key() {
        assert!(Cli::try_parse_from(["cosigner", "public-key", "--private-key", "nope"]).is_err());
    }

    #[test]
    fn test_log_format_flag() {
        let cli = Cli::try_parse_from(["cosigner", "decode", "esr:AA", "--log-format", "json"])
            .unwrap();
        assert_eq!(cli.log_format, LogFormat::Json);
    }

    #[test]
    fn test_decode_to_json() {
        let encoded = cosign_request(ChainIdVariant::Alias(1)).encode(true).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&decode_to_json(&encoded).unwrap()).unwrap();
        assert_eq!(json["version"], 2);
        assert_eq!(
            json["resolved_chain_id"],
            "aca376f206b8fc25a6ed44dbdc66547c36c6c33e3a119ffbeaef943642f0e906"
        );
        assert_eq!(json["req"]["type"], "actions");
        assert_eq!(json["req"]["value"][1]["account"], "eosio.token");
        assert!(decode_to_json("esr:not-a-request").is_err());
    }
}
