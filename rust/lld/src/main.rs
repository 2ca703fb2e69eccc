/*
 * Copyright 2025 Carver Automation Corporation.
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

use anyhow::{Context, Result};
use clap::Parser;
use lld::telemetry;
use tokio::io::AsyncReadExt;

#[derive(Parser, Debug)]
#[command(name = "serviceradar-lld")]
#[command(about = "ServiceRadar low-level discovery reconciliation", long_about = None)]
struct Cli {
    /// Discovery rule to reconcile
    #[arg(long, env = "LLD_RULE_ID")]
    rule_id: u64,

    /// Discovery payload file, `-` reads stdin
    #[arg(long, env = "LLD_PAYLOAD", default_value = "-")]
    payload: String,

    /// Run time as unix seconds
    #[arg(long)]
    now: Option<i64>,
}

async fn read_payload(path: &str) -> Result<Vec<u8>> {
    if path == "-" {
        let mut buf = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .context("failed to read discovery payload from stdin")?;
        return Ok(buf);
    }
    tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read discovery payload {path}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let cli = Cli::parse();
    let payload = read_payload(&cli.payload).await?;
    let now = cli.now.unwrap_or_else(|| chrono::Utc::now().timestamp());

    let report = lld::run(cli.rule_id, &payload, now).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
