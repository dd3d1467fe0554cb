//! `geotz-update` binary entry point.

fn main() {
    std::process::exit(geotz_cli::run());
}
