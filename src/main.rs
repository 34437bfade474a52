use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use ed25519_dalek::SigningKey;
use log::{debug, info};
use rand::{rngs::OsRng, RngCore};
use serde_json::json;

use token_vault::store::{self, StateFile};
use token_vault::{
    Address, Amount, Clock, FixedClock, Migration, Role, SystemClock, TokenCustody, TokenLedger,
    Vault, VaultEvent, VaultResult,
};

type CliVault = Vault<TokenCustody, FixedClock>;

#[derive(Parser, Debug)]
#[command(name = "tvault", version, about = "Upgradeable custodial token vault")]
struct Cli {
    /// State file holding the vault and its token custody
    #[arg(long, global = true, env = "TVAULT_STATE", default_value = "vault-state.json")]
    state: PathBuf,

    /// Pin the clock to this unix timestamp
    #[arg(long, global = true, env = "TVAULT_NOW")]
    now: Option<u64>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct CallerArg {
    /// Principal the call is made as
    #[arg(long, env = "TVAULT_CALLER")]
    caller: Address,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate an ed25519 keypair and its vault address
    Keygen {
        #[arg(long)]
        out_dir: PathBuf,
    },

    /// Create a fresh state file and run the V1 initializer
    Init {
        #[arg(long)]
        admin: Address,
        #[arg(long, default_value_t = 0)]
        fee_bps: u32,
        /// Token address (random when omitted)
        #[arg(long)]
        token: Option<Address>,
        /// Custody address holding deposited tokens (random when omitted)
        #[arg(long)]
        custody: Option<Address>,
    },

    /// Migrate to the next logic version
    Upgrade {
        #[command(subcommand)]
        target: UpgradeTarget,
    },

    /// Operate the underlying token
    Token {
        #[command(subcommand)]
        command: TokenCommand,
    },

    Deposit {
        #[command(flatten)]
        who: CallerArg,
        #[arg(long)]
        amount: Amount,
    },

    Withdraw {
        #[command(flatten)]
        who: CallerArg,
        #[arg(long)]
        amount: Amount,
    },

    ClaimYield {
        #[command(flatten)]
        who: CallerArg,
    },

    RequestWithdrawal {
        #[command(flatten)]
        who: CallerArg,
        #[arg(long)]
        amount: Amount,
    },

    ExecuteWithdrawal {
        #[command(flatten)]
        who: CallerArg,
    },

    CancelWithdrawal {
        #[command(flatten)]
        who: CallerArg,
    },

    /// Withdraw the whole balance now, forfeiting unclaimed yield
    EmergencyWithdraw {
        #[command(flatten)]
        who: CallerArg,
    },

    GrantRole {
        #[command(flatten)]
        who: CallerArg,
        #[arg(long)]
        role: Role,
        #[arg(long)]
        account: Address,
    },

    RevokeRole {
        #[command(flatten)]
        who: CallerArg,
        #[arg(long)]
        role: Role,
        #[arg(long)]
        account: Address,
    },

    RenounceRole {
        #[command(flatten)]
        who: CallerArg,
        #[arg(long)]
        role: Role,
    },

    SetYieldRate {
        #[command(flatten)]
        who: CallerArg,
        #[arg(long)]
        bps: u32,
    },

    Pause {
        #[command(flatten)]
        who: CallerArg,
    },

    Unpause {
        #[command(flatten)]
        who: CallerArg,
    },

    SetWithdrawalDelay {
        #[command(flatten)]
        who: CallerArg,
        #[arg(long)]
        seconds: u64,
    },

    /// Print vault globals and the state root
    Status,

    /// Print one principal's position
    Account {
        #[arg(long)]
        account: Address,
    },

    /// Check total_deposits against the sum of balances
    Audit,
}

#[derive(Subcommand, Debug)]
enum UpgradeTarget {
    V2 {
        #[command(flatten)]
        who: CallerArg,
        #[arg(long)]
        yield_rate_bps: u32,
    },
    V3 {
        #[command(flatten)]
        who: CallerArg,
        #[arg(long)]
        delay_seconds: u64,
    },
}

#[derive(Subcommand, Debug)]
enum TokenCommand {
    Mint {
        #[arg(long)]
        to: Address,
        #[arg(long)]
        amount: Amount,
    },
    /// Allow the vault custody to pull `amount` from `owner`
    Approve {
        #[arg(long)]
        owner: Address,
        #[arg(long)]
        amount: Amount,
    },
    Balance {
        #[arg(long)]
        account: Address,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let now = cli.now.unwrap_or_else(|| SystemClock.now());
    debug!("state={} now={now}", cli.state.display());
    let clock = FixedClock(now);

    match cli.command {
        Command::Keygen { out_dir } => keygen_cmd(&out_dir),
        Command::Init {
            admin,
            fee_bps,
            token,
            custody,
        } => init_cmd(&cli.state, clock, admin, fee_bps, token, custody),
        Command::Upgrade { target } => match target {
            UpgradeTarget::V2 { who, yield_rate_bps } => {
                mutate(&cli.state, clock, |v| {
                    v.upgrade(who.caller, Migration::V2 { yield_rate_bps })
                })
            }
            UpgradeTarget::V3 { who, delay_seconds } => mutate(&cli.state, clock, |v| {
                v.upgrade(
                    who.caller,
                    Migration::V3 {
                        withdrawal_delay_seconds: delay_seconds,
                    },
                )
            }),
        },
        Command::Token { command } => token_cmd(&cli.state, command),
        Command::Deposit { who, amount } => {
            mutate(&cli.state, clock, |v| v.deposit(who.caller, amount))
        }
        Command::Withdraw { who, amount } => {
            mutate(&cli.state, clock, |v| v.withdraw(who.caller, amount))
        }
        Command::ClaimYield { who } => {
            mutate(&cli.state, clock, |v| v.claim_yield(who.caller).map(drop))
        }
        Command::RequestWithdrawal { who, amount } => mutate(&cli.state, clock, |v| {
            v.request_withdrawal(who.caller, amount)
        }),
        Command::ExecuteWithdrawal { who } => mutate(&cli.state, clock, |v| {
            v.execute_withdrawal(who.caller).map(drop)
        }),
        Command::CancelWithdrawal { who } => {
            mutate(&cli.state, clock, |v| v.cancel_withdrawal(who.caller))
        }
        Command::EmergencyWithdraw { who } => mutate(&cli.state, clock, |v| {
            v.emergency_withdraw(who.caller).map(drop)
        }),
        Command::GrantRole { who, role, account } => {
            mutate(&cli.state, clock, |v| v.grant_role(who.caller, role, account))
        }
        Command::RevokeRole { who, role, account } => {
            mutate(&cli.state, clock, |v| v.revoke_role(who.caller, role, account))
        }
        Command::RenounceRole { who, role } => {
            mutate(&cli.state, clock, |v| v.renounce_role(who.caller, role))
        }
        Command::SetYieldRate { who, bps } => {
            mutate(&cli.state, clock, |v| v.set_yield_rate(who.caller, bps))
        }
        Command::Pause { who } => mutate(&cli.state, clock, |v| v.pause_deposits(who.caller)),
        Command::Unpause { who } => {
            mutate(&cli.state, clock, |v| v.unpause_deposits(who.caller))
        }
        Command::SetWithdrawalDelay { who, seconds } => mutate(&cli.state, clock, |v| {
            v.set_withdrawal_delay(who.caller, seconds)
        }),
        Command::Status => status_cmd(&cli.state, clock),
        Command::Account { account } => account_cmd(&cli.state, clock, account),
        Command::Audit => audit_cmd(&cli.state, clock),
    }
}

fn open(path: &Path, clock: FixedClock) -> Result<CliVault> {
    let file = store::load(path)?;
    Ok(Vault::from_state(file.vault, file.custody, clock))
}

fn print_events(events: &[VaultEvent]) -> Result<()> {
    for event in events {
        println!("{}", serde_json::to_string(event)?);
    }
    Ok(())
}

/// Loads the state, runs one vault call, prints its events and saves.
/// Nothing is written when the call fails.
fn mutate(
    path: &Path,
    clock: FixedClock,
    call: impl FnOnce(&mut CliVault) -> VaultResult<()>,
) -> Result<()> {
    let mut vault = open(path, clock)?;
    call(&mut vault)?;
    print_events(&vault.take_events())?;
    let (state, custody) = vault.into_parts();
    store::save(path, &StateFile::new(state, custody))?;
    Ok(())
}

fn keygen_cmd(out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir).with_context(|| format!("creating {}", out_dir.display()))?;

    let mut sk_bytes = [0u8; 32];
    OsRng.fill_bytes(&mut sk_bytes);
    let sk = SigningKey::from_bytes(&sk_bytes);
    let pk = sk.verifying_key();
    let address = Address::from_public_key(pk.as_bytes());

    for (name, contents) in [
        ("sk.hex", hex::encode(sk_bytes)),
        ("pk.hex", hex::encode(pk.as_bytes())),
        ("address.txt", address.to_string()),
    ] {
        let path = out_dir.join(name);
        fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))?;
    }
    info!("keypair written to {}", out_dir.display());
    println!("{address}");
    Ok(())
}

fn init_cmd(
    path: &Path,
    clock: FixedClock,
    admin: Address,
    fee_bps: u32,
    token: Option<Address>,
    custody: Option<Address>,
) -> Result<()> {
    if path.exists() {
        bail!("state file {} already exists", path.display());
    }
    let token = token.unwrap_or_else(|| Address::random(&mut OsRng));
    let custody = custody.unwrap_or_else(|| Address::random(&mut OsRng));

    let mut vault = Vault::new(TokenCustody::new(custody, TokenLedger::new(token)), clock);
    vault.initialize(token, admin, fee_bps)?;
    print_events(&vault.take_events())?;
    let (state, custody) = vault.into_parts();
    store::create(path, &StateFile::new(state, custody))?;
    info!("vault created at {}", path.display());
    Ok(())
}

fn token_cmd(path: &Path, command: TokenCommand) -> Result<()> {
    let mut file = store::load(path)?;
    let custody = file.custody.custody;
    let token = &mut file.custody.token;
    match command {
        TokenCommand::Mint { to, amount } => {
            token.mint(&to, amount)?;
            println!("{}", json!({ "type": "minted", "to": to, "amount": amount.to_string() }));
        }
        TokenCommand::Approve { owner, amount } => {
            token.approve(&owner, &custody, amount);
            println!(
                "{}",
                json!({ "type": "approved", "owner": owner, "spender": custody, "amount": amount.to_string() })
            );
        }
        TokenCommand::Balance { account } => {
            println!(
                "{}",
                json!({
                    "account": account,
                    "balance": token.balance_of(&account).to_string(),
                    "allowance": token.allowance(&account, &custody).to_string(),
                })
            );
            return Ok(());
        }
    }
    store::save(path, &file)?;
    Ok(())
}

fn status_cmd(path: &Path, clock: FixedClock) -> Result<()> {
    let vault = open(path, clock)?;
    let state = vault.state();
    let roles: serde_json::Map<String, serde_json::Value> = Role::ALL
        .iter()
        .map(|role| {
            let members: Vec<String> = state.roles.members(*role).map(|a| a.to_string()).collect();
            (role.to_string(), json!(members))
        })
        .collect();
    let report = json!({
        "version": state.version.to_string(),
        "initialized": state.initialized,
        "asset": vault.asset_token(),
        "custody": vault.asset().custody,
        "custody_balance": vault.asset().held().to_string(),
        "total_deposits": vault.total_deposits().to_string(),
        "deposit_fee_bps": vault.deposit_fee_bps(),
        "yield_rate_bps": vault.yield_rate_bps(),
        "deposits_paused": vault.is_deposits_paused(),
        "withdrawal_delay_seconds": vault.withdrawal_delay(),
        "accounts": state.ledger.accounts.len(),
        "roles": roles,
        "state_root": store::state_root_hex(state),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn account_cmd(path: &Path, clock: FixedClock, account: Address) -> Result<()> {
    let vault = open(path, clock)?;
    let entry = vault.state().ledger.account(&account);
    let request = vault.withdrawal_request(&account).map(|r| {
        json!({
            "amount": r.amount.to_string(),
            "requested_at": r.requested_at,
            "ready_at": r.requested_at.saturating_add(vault.withdrawal_delay()),
        })
    });
    let roles: Vec<String> = Role::ALL
        .iter()
        .filter(|role| vault.has_role(**role, &account))
        .map(|role| role.to_string())
        .collect();
    let report = json!({
        "account": account,
        "balance": vault.balance_of(&account).to_string(),
        "pending_yield": vault.user_yield(&account).ok().map(|y| y.to_string()),
        "last_yield_timestamp": entry.and_then(|e| e.last_yield_timestamp),
        "withdrawal_request": request,
        "roles": roles,
        "token_balance": vault.asset().token.balance_of(&account).to_string(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn audit_cmd(path: &Path, clock: FixedClock) -> Result<()> {
    let vault = open(path, clock)?;
    vault.audit().context("ledger audit failed")?;
    let total = vault.total_deposits();
    let held = vault.asset().held();
    println!(
        "{}",
        json!({
            "ok": true,
            "total_deposits": total.to_string(),
            "custody_balance": held.to_string(),
            "unbacked": total.saturating_sub(held).to_string(),
            "state_root": store::state_root_hex(vault.state()),
        })
    );
    Ok(())
}
