pub mod config;
pub mod contract;
pub mod notification;
pub mod pms;
pub mod sweep;
pub mod upcoming;
pub mod user;

use chrono::NaiveDate;
use pmstrack_core::pms::parse_date;
use pmstrack_core::ContractClass;
use serde::Serialize;

pub type CmdResult = Result<(), Box<dyn std::error::Error>>;

/// Print a value as pretty JSON on stdout.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> CmdResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn date_arg(raw: &str) -> Result<NaiveDate, Box<dyn std::error::Error>> {
    Ok(parse_date(raw).ok_or_else(|| format!("invalid date: {raw}"))?)
}

/// Class names accepted for stored contracts.
pub fn stored_class_arg(raw: &str) -> Result<ContractClass, Box<dyn std::error::Error>> {
    let class = ContractClass::parse(raw);
    if !class.is_stored() {
        return Err(format!("unknown contract class: {raw} (expected hardware or label)").into());
    }
    Ok(class)
}
