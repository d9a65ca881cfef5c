// utils/reference.rs
use rand::Rng;

/// Internal payment reference attached to every charge attempt.
/// Doubles as the idempotency key passed to the gateway.
pub fn generate_payment_reference() -> String {
    let suffix: String = {
        use rand::distr::Alphanumeric;
        let mut rng = rand::rng();
        (0..8).map(|_| rng.sample(Alphanumeric) as char).collect()
    };
    format!(
        "FXB_{}{}",
        uuid::Uuid::new_v4().to_string().replace("-", "").to_uppercase()[..12].to_string(),
        suffix.to_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_carry_prefix_and_are_unique() {
        let a = generate_payment_reference();
        let b = generate_payment_reference();
        assert!(a.starts_with("FXB_"));
        assert_eq!(a.len(), "FXB_".len() + 20);
        assert_ne!(a, b);
    }
}
