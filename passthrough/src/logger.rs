use std::env;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;

use env_logger::{Builder, Target};
use time::macros::format_description;
use time::OffsetDateTime;

const DEFAULT_FILTER: &str = "warn,passthrough_setup=info,engine=info,host=info";
const VERBOSE_FILTER: &str = "warn,passthrough_setup=debug,engine=debug,host=debug,common=debug";

pub fn init(verbose: bool, log_file: Option<&Path>) -> io::Result<()> {
    let mut builder = Builder::new();
    builder.format(|buf, record| {
        let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
        let stamp = now.format(format_description!("[year]-[month]-[day] [hour]:[minute]:[second]"))
            .unwrap_or_default();
        writeln!(buf, "[{},{:03}] {}: {}", stamp, now.millisecond(), record.level(), record.args())
    });

    let default = if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER };
    let config = env::var("RUST_LOG").unwrap_or_else(|_| default.to_owned());
    builder.parse_filters(&config);

    if let Some(path) = log_file {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.try_init().map_err(|e| io::Error::new(io::ErrorKind::Other, e))
}
