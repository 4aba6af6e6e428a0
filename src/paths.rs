//! Well-known file locations.

use std::path::PathBuf;

pub const APP_DATA_DIR_NAME: &str = "SerialTool";
pub const LOG_FILE_NAME: &str = "SerialTool.log";
pub const DEFAULT_CFG_FILE_NAME: &str = "SerialToolCfg.json";
pub const DEFAULT_DATA_EXPORT_FILE_NAME: &str = "rxTxData.log";
pub const RECENTLY_USED_CFG_FILE_NAME: &str = "_recentlyUsedConfigurations.txt";

/// `<data dir>/SerialTool`, falling back to the working directory when the
/// platform reports no data directory.
pub fn app_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DATA_DIR_NAME)
}

pub fn log_file_path() -> PathBuf {
    app_data_dir().join(LOG_FILE_NAME)
}

pub fn recently_used_cfg_file() -> PathBuf {
    app_data_dir().join(RECENTLY_USED_CFG_FILE_NAME)
}

pub fn default_cfg_file() -> PathBuf {
    app_data_dir().join(DEFAULT_CFG_FILE_NAME)
}

pub fn default_data_export_file() -> PathBuf {
    app_data_dir().join(DEFAULT_DATA_EXPORT_FILE_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_files_live_in_app_dir() {
        let dir = app_data_dir();
        assert!(dir.ends_with(APP_DATA_DIR_NAME));
        assert_eq!(log_file_path().parent(), Some(dir.as_path()));
        assert_eq!(recently_used_cfg_file().file_name().unwrap(), RECENTLY_USED_CFG_FILE_NAME);
    }
}
