// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Locating the SSH key pair handed to the installer and used by the probe

use camino::Utf8Path;
use camino::Utf8PathBuf;
use slog_error_chain::SlogInlineError;
use thiserror::Error;

/// A public key (with its contents) and the matching private key path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyPair {
    pub public_path: Utf8PathBuf,
    pub private_path: Utf8PathBuf,
    /// Contents of the public key file, installed on deployed nodes.
    pub public_key: String,
}

#[derive(Debug, Error, SlogInlineError)]
pub enum KeyError {
    #[error("invalid key search pattern for \"{dir}\"")]
    Pattern {
        dir: Utf8PathBuf,
        #[source]
        err: glob::PatternError,
    },
    #[error("no public key (*.pub) found in \"{dir}\"")]
    NoPublicKey { dir: Utf8PathBuf },
    #[error("public key \"{public}\" has no private key at \"{private}\"")]
    NoPrivateKey { public: Utf8PathBuf, private: Utf8PathBuf },
    #[error("error reading \"{path}\"")]
    Read {
        path: Utf8PathBuf,
        #[source]
        err: std::io::Error,
    },
}

/// Picks the first `*.pub` file in `dir`, in lexicographic order, and the
/// private key next to it with the `.pub` suffix removed.
pub fn discover(dir: &Utf8Path) -> Result<KeyPair, KeyError> {
    let pattern =
        format!("{}/*.pub", glob::Pattern::escape(dir.as_str()));
    let mut candidates: Vec<Utf8PathBuf> = glob::glob(&pattern)
        .map_err(|err| KeyError::Pattern { dir: dir.to_owned(), err })?
        .filter_map(Result::ok)
        .filter_map(|path| Utf8PathBuf::try_from(path).ok())
        .filter(|path| path.is_file())
        .collect();
    candidates.sort();

    let public_path = candidates
        .into_iter()
        .next()
        .ok_or_else(|| KeyError::NoPublicKey { dir: dir.to_owned() })?;
    let private_path = public_path.with_extension("");
    if !private_path.is_file() {
        return Err(KeyError::NoPrivateKey {
            public: public_path,
            private: private_path,
        });
    }

    let public_key = std::fs::read_to_string(&public_path)
        .map_err(|err| KeyError::Read { path: public_path.clone(), err })?
        .trim_end()
        .to_string();

    Ok(KeyPair { public_path, private_path, public_key })
}
