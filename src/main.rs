use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vcf_filter::models::input::SitesFile;
use vcf_filter::{write_expression_help, Filter};

#[derive(Parser)]
#[command(name = "vcf-filter")]
#[command(version)]
#[command(about = "Filter variant call records with a boolean/arithmetic expression")]
#[command(long_about = None)]
struct Cli {
    /// Filtering expression, e.g. '%QUAL>10 && FMT/DP>8'
    #[arg(short, long)]
    expression: Option<String>,

    /// Sites file (JSON) carrying the schema and the records to test
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Print the per-sample pass mask next to each record
    #[arg(short, long)]
    samples: bool,

    /// Print the expression language reference and exit
    #[arg(long)]
    help_expressions: bool,

    /// Log level
    #[arg(short = 'v', long, default_value = "warn")]
    log_level: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("vcf_filter={}", cli.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.help_expressions {
        let mut stdout = std::io::stdout();
        write_expression_help(&mut stdout)?;
        return Ok(());
    }

    let (Some(expression), Some(input)) = (cli.expression, cli.input) else {
        bail!("--expression and --input are required (see --help)");
    };

    let text = std::fs::read_to_string(&input)
        .with_context(|| format!("could not read {}", input.display()))?;
    let sites: SitesFile =
        serde_json::from_str(&text).with_context(|| format!("invalid sites file {}", input.display()))?;
    let (schema, records) = sites.into_parts()?;

    let mut filter = Filter::new(&schema, &expression)?;
    info!(
        "compiled '{}' against {} samples (unpack 0x{:x})",
        filter.expression(),
        schema.n_samples(),
        filter.max_unpack()
    );

    let mut passed = 0usize;
    for (index, record) in records.iter().enumerate() {
        let (site, mask) = filter.evaluate_samples(record)?;
        if site {
            passed += 1;
        }
        let verdict = if site { "PASS" } else { "FAIL" };
        if cli.samples {
            let mask = mask
                .map(|m| {
                    m.iter()
                        .map(|&bit| if bit != 0 { '+' } else { '-' })
                        .collect::<String>()
                })
                .unwrap_or_else(|| ".".to_string());
            println!("{index}\t{verdict}\t{mask}");
        } else {
            println!("{index}\t{verdict}");
        }
    }
    info!("{passed}/{} records passed", records.len());
    Ok(())
}
