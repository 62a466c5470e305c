use std::path::{Path, PathBuf};

/// Default directory for the demo server's auto-generated certificate.
pub fn default_cert_dir(app_name: &str) -> PathBuf {
    #[cfg(windows)]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(app_name)
            .join("tls")
    }
    #[cfg(not(windows))]
    {
        std::env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config")))
            .unwrap_or_else(|| PathBuf::from("."))
            .join(app_name)
            .join("tls")
    }
}

/// Reuse `cert.pem`/`key.pem` in `dir`, generating a self-signed pair for `names` if absent.
pub fn ensure_cert_pair(dir: &Path, names: &[String]) -> anyhow::Result<(PathBuf, PathBuf)> {
    std::fs::create_dir_all(dir)?;
    let cert_path = dir.join("cert.pem");
    let key_path = dir.join("key.pem");

    if cert_path.exists() && key_path.exists() {
        return Ok((cert_path, key_path));
    }

    let rcgen::CertifiedKey { cert, signing_key } =
        rcgen::generate_simple_self_signed(names.to_vec())?;
    std::fs::write(&cert_path, cert.pem())?;
    std::fs::write(&key_path, signing_key.serialize_pem())?;

    Ok((cert_path, key_path))
}

/// SHA-256 fingerprint of the first certificate in a PEM file, as `AA:BB:..`.
pub fn sha256_fingerprint_from_pem(cert_path: &Path) -> anyhow::Result<String> {
    use rustls::pki_types::CertificateDer;
    use rustls::pki_types::pem::PemObject;

    let Some(cert) = CertificateDer::pem_file_iter(cert_path)?.next() else {
        anyhow::bail!("No certificate found in {}", cert_path.display());
    };
    let cert = cert?;

    let digest = ring::digest::digest(&ring::digest::SHA256, cert.as_ref());
    let hex = hex::encode_upper(digest.as_ref());

    let mut out = String::with_capacity(32 * 3 - 1);
    for (i, chunk) in hex.as_bytes().chunks(2).enumerate() {
        if i != 0 {
            out.push(':');
        }
        out.push_str(std::str::from_utf8(chunk)?);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("pulselink-demo-{tag}-{}", std::process::id()))
    }

    #[test]
    fn generated_pair_is_reused() {
        let dir = scratch_dir("reuse");
        let names = vec!["localhost".to_string()];
        let (cert, key) = ensure_cert_pair(&dir, &names).unwrap();
        let first = std::fs::read(&cert).unwrap();

        let (cert_again, key_again) = ensure_cert_pair(&dir, &names).unwrap();
        assert_eq!(cert, cert_again);
        assert_eq!(key, key_again);
        assert_eq!(std::fs::read(&cert_again).unwrap(), first);
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn fingerprint_has_32_colon_separated_bytes() {
        let dir = scratch_dir("fingerprint");
        let (cert, _) = ensure_cert_pair(&dir, &["localhost".to_string()]).unwrap();
        let fp = sha256_fingerprint_from_pem(&cert).unwrap();
        assert_eq!(fp.split(':').count(), 32);
        assert!(fp.chars().all(|c| c == ':' || c.is_ascii_hexdigit()));
        let _ = std::fs::remove_dir_all(&dir);
    }
}
