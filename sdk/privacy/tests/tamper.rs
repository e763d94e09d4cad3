use shieldvault_privacy::{
    ENCRYPTED_SHARE_LEN, EncryptionKey, KEY_DERIVATION_MESSAGE, PrivacyError, TransferPayload,
    decrypt_shares, encrypt_shares,
};

fn key() -> EncryptionKey {
    EncryptionKey::derive_from_signature(b"wallet signature over the fixed message")
}

#[test]
fn every_flipped_byte_fails() {
    let k = key();
    let env = encrypt_shares(123_456_789, &k).unwrap();

    for i in 0..ENCRYPTED_SHARE_LEN {
        let mut tampered = env;
        tampered.0[i] ^= 0x01;
        assert_eq!(
            decrypt_shares(&tampered, &k),
            Err(PrivacyError::Decryption),
            "flipping byte {i} must not decrypt"
        );
    }
}

#[test]
fn wrong_key_never_yields_a_value() {
    let env = encrypt_shares(1, &key()).unwrap();
    for b in 0..32u8 {
        let wrong = EncryptionKey::from_bytes([b; 32]);
        assert!(decrypt_shares(&env, &wrong).is_err());
    }
}

#[test]
fn tampered_payload_fails() {
    let k = key();
    let mut sealed = TransferPayload::new([4u8; 32], "payroll")
        .unwrap()
        .seal(&k)
        .unwrap();

    sealed.0[40] ^= 0x80;

    assert!(sealed.open(&k).is_err());
}

#[test]
fn key_message_is_stable() {
    assert!(KEY_DERIVATION_MESSAGE.starts_with("Sign this message to derive your ShieldVault"));
    assert!(!KEY_DERIVATION_MESSAGE.contains("transfer funds"));
}
