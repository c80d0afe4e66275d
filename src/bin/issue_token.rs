//! Mint a bearer token for a user id.
//!
//! Usage: `labeler-token <user-id> [ttl-days]`
//!
//! Reads `JWT_SECRET` from the environment, prints the token on stdout and
//! its expiry on stderr.

use anyhow::Context;

use text_labeler::api::auth::issue_token;

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let user_id = args
        .next()
        .context("usage: labeler-token <user-id> [ttl-days]")?;
    let ttl_days = match args.next() {
        Some(raw) => raw
            .parse::<i64>()
            .with_context(|| format!("ttl-days must be a whole number, got {:?}", raw))?,
        None => 30,
    };

    let secret = std::env::var("JWT_SECRET").context("JWT_SECRET must be set")?;
    let (token, exp) = issue_token(&secret, &user_id, ttl_days)?;

    println!("{}", token);
    eprintln!("expires at unix time {}", exp);
    Ok(())
}
