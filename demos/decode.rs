//! Decode Matter pairing codes (manual pairing code or `MT:` QR string) and print their fields.

use anyhow::Result;
use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Format {
    Text,
    Json,
}

#[derive(Parser, Debug)]
struct Cli {
    /// Manual pairing codes or QR strings
    #[arg(required = true)]
    codes: Vec<String>,

    #[clap(long, env = "MATCOM_FORMAT", value_enum)]
    #[arg(default_value_t = Format::Text)]
    format: Format,

    #[clap(long)]
    #[arg(default_value_t = false)]
    verbose: bool,
}

/// Hyphenated manual code or "n/a" - not every qr payload is expressible as manual code.
fn manual_code_text(payload: &matcom::onboarding::OnboardingPayload) -> String {
    match payload.to_manual_pairing_code() {
        Ok(digits) => matcom::onboarding::format_manual_pairing_code(&digits),
        Err(e) => {
            log::debug!("no manual code: {}", e);
            "n/a".to_owned()
        }
    }
}

fn print_text(code: &str, payload: &matcom::onboarding::OnboardingPayload) -> Result<()> {
    println!("{}", code);
    println!("  version:       {}", payload.version);
    println!("  vendor id:     0x{:04x}", payload.vendor_id);
    println!("  product id:    0x{:04x}", payload.product_id);
    println!("  flow:          {:?}", payload.commissioning_flow);
    println!("  capabilities:  0x{:02x}", payload.discovery_capabilities);
    println!("  discriminator: {}", payload.discriminator);
    println!("  passcode:      {}", payload.passcode);
    println!("  manual code:   {}", manual_code_text(payload));
    if !payload.discriminator.is_upper_4_bits_only() {
        println!("  qr code:       {}", payload.to_qr_code()?);
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        log::LevelFilter::Trace
    } else {
        log::LevelFilter::Error
    };
    env_logger::Builder::new()
        .parse_default_env()
        .target(env_logger::Target::Stdout)
        .filter_level(log_level)
        .format_line_number(true)
        .format_file(true)
        .format_timestamp(Some(env_logger::TimestampPrecision::Millis))
        .init();

    let mut failed = false;
    for code in &cli.codes {
        let payload = match matcom::onboarding::decode(code) {
            Ok(p) => p,
            Err(e) => {
                eprintln!("{}: {}", code, e);
                failed = true;
                continue;
            }
        };
        log::debug!("decoded {:?}", payload);
        let res = match cli.format {
            Format::Text => print_text(code, &payload),
            Format::Json => serde_json::to_string_pretty(&payload)
                .map(|s| println!("{}", s))
                .map_err(anyhow::Error::from),
        };
        if let Err(e) = res {
            eprintln!("{}: {:?}", code, e);
            failed = true;
        }
    }
    if failed {
        std::process::exit(1);
    }
}
