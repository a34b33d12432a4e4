mod raw {
    // See https://docs.rs/built/latest/built/index.html for the full list of generated constants.
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

/// Crate version such as 0.1.0
pub const RGC_PKG_VERSION: &str = raw::PKG_VERSION;

/// Comma separated features enabled for this build
pub const RGC_FEATURES: &str = raw::FEATURES_STR;

lazy_static! {
    /// Git version such as a96e8f991c91a81df51e7975849441f52fdbcdcc, or
    /// a96e8f991c91a81df51e7975849441f52fdbcdcc-dirty, or unknown-git-version if the crate is not
    /// built from a git repo.
    pub static ref RGC_GIT_VERSION: &'static str = &RGC_GIT_VERSION_STRING;

    // Owned string
    static ref RGC_GIT_VERSION_STRING: String = match (raw::GIT_COMMIT_HASH, raw::GIT_DIRTY) {
        (Some(hash), dirty) => format!("{}{}", hash, if dirty == Some(true) { "-dirty" } else { "" }),
        (None, _) => "unknown-git-version".to_string(),
    };
}

/// A one-line description of this build, logged when a collector is created.
pub fn describe() -> String {
    format!(
        "rgc-core {} ({}), features: [{}]",
        RGC_PKG_VERSION, *RGC_GIT_VERSION, RGC_FEATURES
    )
}
