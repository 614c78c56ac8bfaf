use object::{File, Object};
use std::collections::HashMap;

use crate::error::{Error, Result};

/// Exported functions of a module image, as offsets from its load base
pub fn get_exports(data: &[u8]) -> Result<HashMap<String, u64>> {
    let binfile = File::parse(data).map_err(|e| Error::Image(e.to_string()))?;
    let base = binfile.relative_address_base();
    let mut exports = HashMap::new();

    for export in binfile.exports().map_err(|e| Error::Image(e.to_string()))? {
        if let Ok(name) = std::str::from_utf8(export.name()) {
            exports.insert(name.to_string(), export.address().wrapping_sub(base));
        }
    }

    Ok(exports)
}

/// Offset of one export from the module's load base
pub fn get_export(data: &[u8], name: &str) -> Result<Option<u64>> {
    Ok(get_exports(data)?.get(name).copied())
}
