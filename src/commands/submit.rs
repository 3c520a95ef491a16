//! Crawl, generate and restart handlers: submit a task and follow it to the end.

use anyhow::{Context, Result};
use serde_json::{Map, Value, json};
use taskhub_core::task::{Task, TaskManager};

use super::follow::follow_task;
use crate::cli::{CrawlArgs, GenerateArgs};
use crate::output::print_task_summary;

pub async fn run_crawl_command(manager: &TaskManager, args: &CrawlArgs, quiet: bool) -> Result<Task> {
    let config = crawl_config(args);
    submit(manager, "crawl", &config, quiet).await
}

pub async fn run_generate_command(
    manager: &TaskManager,
    args: &GenerateArgs,
    quiet: bool,
) -> Result<Task> {
    let config = generate_config(args);
    submit(manager, "generate", &config, quiet).await
}

pub async fn run_restart_command(manager: &TaskManager, id: &str, quiet: bool) -> Result<Task> {
    let events = manager.events().subscribe();
    let task = manager
        .start_task(id)
        .await
        .with_context(|| format!("cannot restart task {id}"))?;
    println!("Restarted task {}", task.id);
    let finished = follow_task(manager, events, task, quiet).await?;
    print_task_summary(&finished);
    Ok(finished)
}

async fn submit(manager: &TaskManager, task_type: &str, config: &Value, quiet: bool) -> Result<Task> {
    let events = manager.events().subscribe();
    let task = manager
        .create_task(task_type, &config.to_string())
        .await
        .with_context(|| format!("cannot create {task_type} task"))?;
    println!("Created {task_type} task {}", task.id);
    let finished = follow_task(manager, events, task, quiet).await?;
    print_task_summary(&finished);
    Ok(finished)
}

fn crawl_config(args: &CrawlArgs) -> Value {
    let mut config = Map::new();
    let subkind = if let Some(tag) = &args.tag {
        config.insert("query".into(), json!(tag));
        "tag"
    } else if let Some(user) = &args.user {
        config.insert("userID".into(), json!(user));
        "user"
    } else {
        config.insert("illustID".into(), json!(args.illust));
        "illust"
    };
    config.insert("subkind".into(), json!(subkind));

    let optional = [
        ("order", args.order.as_ref().map(|v| json!(v))),
        ("mode", args.mode.as_ref().map(|v| json!(v))),
        ("limit", args.limit.map(|v| json!(v))),
        ("delay", args.delay.map(|v| json!(v))),
        ("cookie", args.cookie.as_ref().map(|v| json!(v))),
    ];
    for (key, value) in optional {
        if let Some(value) = value {
            config.insert(key.into(), value);
        }
    }
    if let Some(proxy) = &args.proxy {
        config.insert("proxyEnabled".into(), json!(true));
        config.insert("proxyURL".into(), json!(proxy));
    }
    Value::Object(config)
}

fn generate_config(args: &GenerateArgs) -> Value {
    let loras: Vec<Value> = args
        .loras
        .iter()
        .map(|(name, weight)| json!({"name": name, "weight": weight}))
        .collect();
    json!({
        "prompt": args.prompt,
        "negativePrompt": args.negative,
        "steps": args.steps,
        "cfgScale": args.cfg_scale,
        "width": args.width,
        "height": args.height,
        "seed": args.seed,
        "sampler": args.sampler,
        "batchSize": args.batch_size,
        "model": args.model,
        "enableHR": args.hires,
        "loras": loras,
    })
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use taskhub_core::task::{TaskConfig, TaskType};

    use super::*;
    use crate::cli::{Cli, Command};

    fn crawl_args(argv: &[&str]) -> CrawlArgs {
        let mut full = vec!["taskhub", "crawl"];
        full.extend_from_slice(argv);
        match Cli::parse_from(full).command {
            Command::Crawl(args) => args,
            other => panic!("expected crawl, got {other:?}"),
        }
    }

    #[test]
    fn test_crawl_config_round_trips_through_task_config() {
        let args = crawl_args(&["--tag", "sunset", "-n", "3", "--proxy", "http://127.0.0.1:7890"]);
        let raw = crawl_config(&args).to_string();
        let TaskConfig::Crawl(config) = TaskConfig::parse(TaskType::Crawl, &raw).unwrap() else {
            panic!("expected crawl config");
        };
        assert_eq!(config.query.as_deref(), Some("sunset"));
        assert_eq!(config.limit, Some(3));
        assert_eq!(config.effective_proxy(), Some("http://127.0.0.1:7890"));
    }

    #[test]
    fn test_crawl_config_user_target() {
        let config = crawl_config(&crawl_args(&["--user", "42"]));
        assert_eq!(config["subkind"], "user");
        assert_eq!(config["userID"], "42");
        assert!(config.get("query").is_none());
    }

    #[test]
    fn test_generate_config_is_accepted() {
        let cli = Cli::parse_from(["taskhub", "generate", "a lighthouse", "--lora", "ink:0.5"]);
        let Command::Generate(args) = cli.command else {
            panic!("expected generate");
        };
        let raw = generate_config(&args).to_string();
        let TaskConfig::Generate(config) = TaskConfig::parse(TaskType::Generate, &raw).unwrap()
        else {
            panic!("expected generate config");
        };
        assert_eq!(config.loras.len(), 1);
        assert_eq!(config.steps, 20);
    }
}
