use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};

/// 签名字段名（请求使用 sign，回调使用 signature）
const SIGNATURE_FIELDS: [&str; 2] = ["signature", "sign"];

/// 网关签名编解码
///
/// 规则：去掉签名字段和空值字段，按键名字典序拼接成
/// `k1=v1&k2=v2&...&key=<secret>`，取 SHA-256 并转为大写十六进制。
/// 结果与参数的迭代顺序无关。
#[derive(Clone)]
pub struct SignatureCodec {
    secret: String,
}

impl SignatureCodec {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// 计算签名
    pub fn sign(&self, params: &HashMap<String, String>) -> String {
        let sorted: BTreeMap<&str, &str> = params
            .iter()
            .filter(|(k, v)| !SIGNATURE_FIELDS.contains(&k.as_str()) && !v.is_empty())
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();

        let mut canonical = String::new();
        for (key, value) in sorted {
            canonical.push_str(key);
            canonical.push('=');
            canonical.push_str(value);
            canonical.push('&');
        }
        canonical.push_str("key=");
        canonical.push_str(&self.secret);

        hex::encode_upper(Sha256::digest(canonical.as_bytes()))
    }

    /// 校验回调签名，常量时间比较
    pub fn verify(&self, params: &HashMap<String, String>) -> bool {
        let provided = SIGNATURE_FIELDS
            .iter()
            .find_map(|field| params.get(*field).filter(|v| !v.is_empty()));

        match provided {
            Some(signature) => secure_eq(self.sign(params).as_bytes(), signature.as_bytes()),
            None => false,
        }
    }

    /// 签名并写入 sign 字段
    pub fn sign_into(&self, params: &mut HashMap<String, String>) {
        let signature = self.sign(params);
        params.insert("sign".to_string(), signature);
    }
}

pub fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0_u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> HashMap<String, String> {
        [
            ("appid", "test-appid"),
            ("mch_no", "test-mch-no"),
            ("order_no", "SQ20240101120000123456"),
            ("amount", "100.00"),
            ("timestamp", "1704067200"),
            ("nonce_str", "test-nonce"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn test_sign_matches_canonical_digest() {
        // sha256("amount=100.00&appid=...&timestamp=1704067200&key=test-secret-key")
        let codec = SignatureCodec::new("test-secret-key");
        assert_eq!(
            codec.sign(&params()),
            "9BFD07D12FB86248CC0A9A52D7A0ED9E683BA011B76E85494469985D308CB811"
        );
    }

    #[test]
    fn test_sign_is_insertion_order_independent() {
        let codec = SignatureCodec::new("test-secret-key");
        let pairs = vec![
            ("timestamp", "1704067200"),
            ("order_no", "SQ20240101120000123456"),
            ("nonce_str", "test-nonce"),
            ("mch_no", "test-mch-no"),
            ("appid", "test-appid"),
            ("amount", "100.00"),
        ];
        let mut reversed = HashMap::new();
        for (k, v) in pairs.into_iter().rev() {
            reversed.insert(k.to_string(), v.to_string());
        }

        assert_eq!(codec.sign(&params()), codec.sign(&reversed));
    }

    #[test]
    fn test_sign_ignores_empty_values_and_signature_fields() {
        let codec = SignatureCodec::new("k");
        let base = params();
        let mut noisy = base.clone();
        noisy.insert("extra".into(), String::new());
        noisy.insert("sign".into(), "OLD".into());
        noisy.insert("signature".into(), "OLDER".into());

        assert_eq!(codec.sign(&base), codec.sign(&noisy));
    }

    #[test]
    fn test_verify_round_trip() {
        let codec = SignatureCodec::new("test-secret-key");
        let mut data = params();
        let signature = codec.sign(&data);
        data.insert("signature".into(), signature);

        assert!(codec.verify(&data));
    }

    #[test]
    fn test_verify_detects_single_character_tampering() {
        let codec = SignatureCodec::new("test-secret-key");
        let mut data = params();
        let signature = codec.sign(&data);
        data.insert("signature".into(), signature);

        for key in params().keys() {
            let mut tampered = data.clone();
            let value = tampered.get_mut(key).unwrap();
            let mut chars: Vec<char> = value.chars().collect();
            let last = chars.len() - 1;
            chars[last] = if chars[last] == 'X' { 'Y' } else { 'X' };
            *value = chars.into_iter().collect();

            assert!(!codec.verify(&tampered), "tampering {} went unnoticed", key);
        }
    }

    #[test]
    fn test_verify_rejects_missing_or_foreign_signature() {
        let codec = SignatureCodec::new("test-secret-key");
        let data = params();
        assert!(!codec.verify(&data));

        let mut foreign = data.clone();
        foreign.insert("signature".into(), SignatureCodec::new("other").sign(&data));
        assert!(!codec.verify(&foreign));
    }

    #[test]
    fn test_secure_eq() {
        assert!(secure_eq(b"abc", b"abc"));
        assert!(!secure_eq(b"abc", b"abd"));
        assert!(!secure_eq(b"abc", b"ab"));
    }
}
