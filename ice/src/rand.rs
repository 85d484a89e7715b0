use rand::Rng;

const RUNES_ALPHA: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const RUNES_CANDIDATE_ID_FOUNDATION: &[u8] =
    b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789+/";

const LEN_UFRAG: usize = 16;
const LEN_PWD: usize = 32;

/// generate_rand_string generates a random string for cryptographic usage.
pub fn generate_rand_string(len: usize, runes: &[u8]) -> String {
    let mut rng = rand::thread_rng();
    (0..len)
        .map(|_| runes[rng.gen_range(0..runes.len())] as char)
        .collect()
}

/// generate_ufrag generates a random ufrag of the minimum acceptable entropy.
pub fn generate_ufrag() -> String {
    generate_rand_string(LEN_UFRAG, RUNES_ALPHA)
}

/// generate_pwd generates a random password of the minimum acceptable entropy.
pub fn generate_pwd() -> String {
    generate_rand_string(LEN_PWD, RUNES_ALPHA)
}

/// generate_cand_id generates a candidate id.
pub fn generate_cand_id() -> String {
    format!(
        "candidate:{}",
        generate_rand_string(24, RUNES_CANDIDATE_ID_FOUNDATION)
    )
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_random_generator_collision() {
        let ufrag1 = generate_ufrag();
        let ufrag2 = generate_ufrag();
        assert_ne!(ufrag1, ufrag2);
        assert_eq!(ufrag1.len(), LEN_UFRAG);
        assert_eq!(generate_pwd().len(), LEN_PWD);
    }
}
