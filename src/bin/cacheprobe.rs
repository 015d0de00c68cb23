/*!
 * cacheprobe Main Entry Point
 *
 * Opens one connection to a local cache server, sends a `stats` command
 * and prints whatever comes back in a single read.
 */

use anyhow::*;
use cacheprobe::*;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Diagnostic command sent to the server
const PROBE_CMD: &[u8] = b"stats\r\n";

/// Main function - entry point for the probe
///
/// 1. Initialize logging system
/// 2. Connect to the default target
/// 3. Send the probe command
/// 4. Print one reply
fn main() -> Result<()> {
    // Initialize logging - respects RUST_LOG environment variable
    // Example: RUST_LOG=debug cargo run
    env_logger::init();

    let mut cli = TcpClient::new(DEFAULT_HOST, DEFAULT_PORT);
    cli.connect()
        .with_context(|| format!("connecting to {}:{}", DEFAULT_HOST, DEFAULT_PORT))?;

    cli.transmit(PROBE_CMD).context("sending probe command")?;

    let mut buf = [0u8; RECV_BUF];
    let n = cli.receive(&mut buf).context("reading reply")?;
    ensure!(n > 0, "server closed the connection without replying");

    println!("got: {}", String::from_utf8_lossy(&buf[..n]));
    Ok(())
}
