//! # TIERVAULT Admin
//!
//! Command-line administration of a data directory.
//!
//! ```bash
//! tiervault_admin ./data stats
//! tiervault_admin ./data import-tier gold gold_codes.txt
//! RUST_LOG=debug tiervault_admin ./data draw 10001
//! ```
//!
//! Every mutating command writes its audit entry in the same transaction as
//! the change itself.

use std::path::Path;
use std::process::ExitCode;

use tiervault::{
    export_users, parse_codes, parse_user_ids, read_import_file, stock_alerts, telemetry,
    ConfigManager, HealthReport, HostError, HostResult, ADMIN_ACTOR, EXPORT_BATCH_SIZE,
};
use tiervault_store::{ConfigChange, PoolId, Store, Tier, SYSTEM_ACTOR};

const USAGE: &str = "\
usage: tiervault_admin <data-dir> <command> [args]

commands:
  stats                          stock, users and alerts
  health                         data files, audit log and config flags
  odds                           current lottery config
  import-reg <file>              add registration codes, one per line
  import-tier <tier> <file>      add codes to gold, purple, blue or event
  import-users <file>            mark user ids registered without a code
  register <user>                issue a registration code
  draw <user>                    run one draw
  reset-user <user>              drop a user's registration
  reset-lottery <user>           zero a user's draw counters
  weekly-reset                   zero every user's weekly draws
  set-config <key> <value>       change a lottery setting
  history [limit]                newest draws
  logs [limit]                   newest audit entries
  preview <pool> [limit]         masked codes next in line
  export                         registered users as csv lines
  blacklist <add|remove> <user>  change the blacklist
  blacklist <list|clear>
  announce <text>                set the announcement ('-' clears it)
  event <name> [end]             enable the event pool
  event-off                      disable the event pool";

const DEFAULT_LIMIT: usize = 10;

fn main() -> ExitCode {
    if let Err(e) = telemetry::init() {
        eprintln!("{e}");
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(HostError::InvalidArgument(msg)) => {
            eprintln!("{msg}\n\n{USAGE}");
            ExitCode::from(2)
        }
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn invalid(msg: impl Into<String>) -> HostError {
    HostError::InvalidArgument(msg.into())
}

fn limit_arg(rest: &[String]) -> HostResult<usize> {
    match rest.first() {
        None => Ok(DEFAULT_LIMIT),
        Some(raw) => raw
            .parse()
            .map_err(|_| invalid(format!("limit must be a number, got {raw:?}"))),
    }
}

fn pool_arg(raw: &str) -> HostResult<PoolId> {
    if raw == "registration" {
        return Ok(PoolId::Registration);
    }
    Ok(PoolId::Tier(raw.parse::<Tier>()?))
}

fn run(args: &[String]) -> HostResult<()> {
    let [dir, command, rest @ ..] = args else {
        return Err(invalid("missing data directory or command"));
    };
    let store = Store::open_in(dir)?;
    let config = ConfigManager::open(dir)?;

    match (command.as_str(), rest) {
        ("stats", []) => print_stats(&store, &config),
        ("health", []) => println!("{}", HealthReport::collect(&store, &config)),
        ("odds", []) => {
            let c = store.lottery_config();
            println!(
                "weights gold/purple/blue/event: {}/{}/{}/{}",
                c.gold_weight, c.purple_weight, c.blue_weight, c.event_weight
            );
            println!("pity: {} draws -> {}", c.pity_threshold, c.pity_tier);
            println!("limits: daily {} weekly {} (0 = unlimited)", c.daily_limit, c.weekly_limit);
        }
        ("import-reg", [file]) => import_codes(&store, PoolId::Registration, file)?,
        ("import-tier", [tier, file]) => import_codes(&store, PoolId::Tier(tier.parse()?), file)?,
        ("import-users", [file]) => {
            let list = parse_user_ids(&read_import_file(Path::new(file))?);
            let report = store.transaction(|tx| {
                let report = tx.import_registered_users(&list.entries);
                tx.log_action(
                    "import users",
                    ADMIN_ACTOR,
                    &format!("{} added {} skipped", report.added, report.skipped),
                );
                report
            })?;
            println!(
                "added {} skipped {} invalid {}",
                report.added, report.skipped, list.invalid
            );
        }
        ("register", [user]) => {
            if !config.is_enabled() {
                println!("plugin disabled");
                return Ok(());
            }
            let test_mode = config.is_test_mode();
            let outcome = store.transaction(|tx| {
                let outcome = tx.register(user, test_mode);
                if outcome.is_success() {
                    tx.log_action("register", user, if test_mode { "test" } else { "issued" });
                }
                outcome
            })?;
            match outcome.code() {
                Some(code) => println!("{}: {code}", outcome.reason()),
                None => println!("{}", outcome.reason()),
            }
        }
        ("draw", [user]) => {
            if !config.is_enabled() {
                println!("plugin disabled");
                return Ok(());
            }
            let test_mode = config.is_test_mode();
            let outcome = store.transaction(|tx| {
                let outcome = tx.draw_lottery(user, test_mode);
                if let Some(tier) = outcome.tier() {
                    tx.log_action("draw", user, tier.as_str());
                }
                outcome
            })?;
            match (outcome.tier(), outcome.code()) {
                (Some(tier), Some(code)) => println!("{tier}: {code}"),
                _ => println!("{}", outcome.reason()),
            }
        }
        ("reset-user", [user]) => {
            let done = store.transaction(|tx| {
                let done = tx.reset_user_registration(user);
                if done {
                    tx.log_action("reset registration", ADMIN_ACTOR, user);
                }
                done
            })?;
            println!("{}", if done { "reset" } else { "not registered" });
        }
        ("reset-lottery", [user]) => {
            let done = store.transaction(|tx| {
                let done = tx.reset_user_lottery(user);
                if done {
                    tx.log_action("reset lottery", ADMIN_ACTOR, user);
                }
                done
            })?;
            println!("{}", if done { "reset" } else { "no draw record" });
        }
        ("weekly-reset", []) => {
            let users = store.weekly_reset()?;
            println!("weekly draws reset for {users} users ({SYSTEM_ACTOR} entry logged)");
        }
        ("set-config", [key, value]) => {
            let change = ConfigChange::parse(key, value)
                .ok_or_else(|| invalid(format!("cannot set {key} to {value:?}")))?;
            let applied = store.transaction(|tx| {
                let applied = tx.update_lottery_config(change);
                if applied {
                    tx.log_action("set config", ADMIN_ACTOR, &format!("{key}={value}"));
                }
                applied
            })?;
            println!("{}", if applied { "updated" } else { "rejected" });
        }
        ("history", rest) => {
            for entry in store.lottery_history(limit_arg(rest)?) {
                println!(
                    "{} {} {} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.consumer_id,
                    entry.tier,
                    entry.code_hash
                );
            }
        }
        ("logs", rest) => {
            for entry in store.logs(limit_arg(rest)?) {
                println!(
                    "{} {} {} {}",
                    entry.timestamp.format("%Y-%m-%d %H:%M"),
                    entry.actor_id,
                    entry.action,
                    entry.detail
                );
            }
        }
        ("preview", [pool, rest @ ..]) => {
            for code in store.codes_preview(pool_arg(pool)?, limit_arg(rest)?) {
                println!("{code}");
            }
        }
        ("export", []) => {
            let batches = export_users(&store, EXPORT_BATCH_SIZE);
            let total: usize = batches.iter().map(Vec::len).sum();
            for line in batches.iter().flatten() {
                println!("{line}");
            }
            store.log_action(
                "export users",
                ADMIN_ACTOR,
                &format!("{total} users, {} batches", batches.len()),
            )?;
        }
        ("blacklist", [action, user]) => {
            let changed = store.transaction(|tx| {
                let changed = match action.as_str() {
                    "add" => tx.add_to_blacklist(user),
                    "remove" => tx.remove_from_blacklist(user),
                    _ => return None,
                };
                if changed {
                    tx.log_action(&format!("blacklist {action}"), ADMIN_ACTOR, user);
                }
                Some(changed)
            })?;
            match changed {
                Some(true) => println!("done"),
                Some(false) => println!("unchanged"),
                None => return Err(invalid(format!("unknown blacklist action {action:?}"))),
            }
        }
        ("blacklist", [action]) if action == "list" => {
            for user in store.blacklist() {
                println!("{user}");
            }
        }
        ("blacklist", [action]) if action == "clear" => {
            let removed = store.transaction(|tx| {
                let removed = tx.clear_blacklist();
                tx.log_action("blacklist clear", ADMIN_ACTOR, &removed.to_string());
                removed
            })?;
            println!("removed {removed}");
        }
        ("announce", [text]) if text == "-" => {
            store.transaction(|tx| {
                tx.clear_announcement();
                tx.log_action("clear announcement", ADMIN_ACTOR, "");
            })?;
        }
        ("announce", words) if !words.is_empty() => {
            let text = words.join(" ");
            store.transaction(|tx| {
                tx.set_announcement(&text);
                tx.log_action("set announcement", ADMIN_ACTOR, &text);
            })?;
        }
        ("event", [name, end @ ..]) if end.len() <= 1 => {
            let end_time = end.first().map_or("", String::as_str);
            store.transaction(|tx| {
                tx.set_event_pool(name, end_time);
                tx.log_action("event on", ADMIN_ACTOR, name);
            })?;
            let info = store.event_pool_info();
            println!("event {:?} enabled, {} cards", info.name, info.stock);
        }
        ("event-off", []) => {
            store.transaction(|tx| {
                tx.disable_event_pool();
                tx.log_action("event off", ADMIN_ACTOR, "");
            })?;
        }
        _ => return Err(invalid(format!("unknown command {command:?}"))),
    }
    Ok(())
}

fn import_codes(store: &Store, pool: PoolId, file: &str) -> HostResult<()> {
    let list = parse_codes(&read_import_file(Path::new(file))?);
    let report = store.transaction(|tx| {
        let report = tx.add_codes(pool, &list.entries);
        tx.log_action(
            &format!("import {pool}"),
            ADMIN_ACTOR,
            &format!("{} added {} skipped", report.added, report.skipped),
        );
        report
    })?;
    println!("added {} skipped {}", report.added, report.skipped);
    Ok(())
}

fn print_stats(store: &Store, config: &ConfigManager) {
    let stats = store.statistics();
    println!("registered users: {}", stats.registered_users);
    println!(
        "registration codes: {} unused, {} issued",
        stats.registration_unused, stats.registration_used
    );
    for (tier, stock) in stats.tier_stock.iter() {
        println!("{tier}: {stock} in stock, {} drawn recently", stats.tier_draws.get(tier));
    }
    println!("total draws: {}", stats.total_draws);
    println!("blacklisted: {}", stats.blacklist_count);

    let event = store.event_pool_info();
    if event.enabled {
        println!("event {:?} until {:?}", event.name, event.end_time);
    }
    let announcement = store.announcement();
    if !announcement.content.is_empty() {
        println!("announcement: {}", announcement.content);
    }

    let alerts = stock_alerts(&stats, config.stock_alert_threshold());
    if alerts.is_empty() {
        println!("alerts: none");
    }
    for alert in alerts {
        println!("alert: {alert}");
    }
}
