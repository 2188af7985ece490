use rand::Rng;

pub const CARD_NUMBER_LEN: usize = 12;

/// Random lowercase-alphabetic card number of [`CARD_NUMBER_LEN`] characters.
pub fn generate_card_number() -> String {
    let mut rng = rand::thread_rng();
    (0..CARD_NUMBER_LEN)
        .map(|_| rng.gen_range(b'a'..=b'z') as char)
        .collect()
}
