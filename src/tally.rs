//! The tally pipeline.
//!
//! Drives stages 0–7 over an immutable ledger snapshot: verify the ledger,
//! shuffle the registered credentials, tag them, shuffle the (credential,
//! ballot) pairs of the voting records under one permutation, tag the
//! credential component, intersect the two tag sets to isolate ballots
//! cast under registered credentials, threshold-decrypt the survivors and
//! count. Every stage leaves a public transcript behind for independent
//! re-verification.

use std::collections::{BTreeMap, HashSet};

use curve25519_dalek::ristretto::RistrettoPoint;

use crate::{
    decode_plaintext, generate_deterministic_tags, join_components, new_shuffler, split_components,
    threshold_decrypt, verify_deterministic_tags, verify_ledger, verify_threshold_decryption,
    Config, DeterministicTagProof, ElGamalCiphertext, ElectionAuthority, Error, KeyShare,
    LedgerSnapshot, PartialDecryption, RandomStream, SequenceShuffleResult, SingleShuffleResult,
    TallyMember,
};

const LOG_TARGET: &str = "votegral::tally";

/// The full output of a tally run, including every intermediate
/// transcript needed to re-verify it end to end.
#[derive(Debug)]
pub struct Tally {
    /// Shuffle chain over the registration ledger's encrypted credentials.
    pub reg_records_shuffled: Vec<SingleShuffleResult>,
    /// Shuffle chain over the voting ledger's (credential, ballot) pairs.
    pub vote_records_shuffled: Vec<SequenceShuffleResult>,

    /// Deterministic tags on the shuffled registration credentials.
    pub reg_cred_tags: Vec<RistrettoPoint>,
    pub reg_cred_tags_proof: DeterministicTagProof,
    /// Deterministic tags on the shuffled ballot credentials.
    pub vote_cred_tags: Vec<RistrettoPoint>,
    pub vote_cred_tags_proof: DeterministicTagProof,

    /// The shuffled ballots whose credential tag matched a registration
    /// tag.
    pub real_enc_votes: Vec<ElGamalCiphertext>,
    pub real_dec_votes: Vec<u8>,
    pub decryption_proofs: Vec<Vec<PartialDecryption>>,

    pub results: BTreeMap<u8, u64>,
    pub winner: String,
}

/// Threshold-decrypts a list of ballots, verifying every partial
/// decryption proof and classifying each plaintext.
pub fn decrypt_votes(
    shares: &[KeyShare],
    ciphertexts: &[ElGamalCiphertext],
    rng: &mut RandomStream,
) -> Result<(Vec<u8>, Vec<Vec<PartialDecryption>>), Error> {
    let member_pks: Vec<RistrettoPoint> = shares.iter().map(|share| share.pk).collect();

    let mut votes = Vec::with_capacity(ciphertexts.len());
    let mut proofs = Vec::with_capacity(ciphertexts.len());
    for (index, ciphertext) in ciphertexts.iter().enumerate() {
        let (plaintext, partials) = threshold_decrypt(ciphertext, shares, rng)?;
        verify_threshold_decryption(ciphertext, &member_pks, &partials, &plaintext)?;
        votes.push(decode_plaintext(&plaintext, index)?);
        proofs.push(partials);
    }
    Ok((votes, proofs))
}

/// Executes the entire backend tallying process.
pub fn run_tally(
    config: &Config,
    ea: &ElectionAuthority,
    snapshot: &LedgerSnapshot,
    rng: &mut RandomStream,
) -> Result<Tally, Error> {
    if snapshot.registration.len() < 2 || snapshot.votes.len() < 2 {
        return Err(Error::ProtocolMisuse(
            "not enough registration or voting records to tally".into(),
        ));
    }

    let ea_pk = ea.public_key();
    let members: Vec<TallyMember> = ea
        .key_shares()
        .iter()
        .enumerate()
        .map(|(i, share)| TallyMember::new(i as u32 + 1, share, rng))
        .collect();
    let member_count = members.len() as u32;
    let member_pks: Vec<RistrettoPoint> = members.iter().map(|m| m.public_key()).collect();
    let shuffler = new_shuffler(config);

    tracing::info!(target: LOG_TARGET, "Stage 0: verifying ledger contents");
    verify_ledger(config.cores, snapshot, &ea_pk)?;

    tracing::info!(
        target: LOG_TARGET,
        records = snapshot.registration.len(),
        "Stage 1: shuffling registration records"
    );
    let reg_creds: Vec<ElGamalCiphertext> = snapshot
        .registration
        .iter()
        .map(|entry| entry.enc_credential_pk)
        .collect();
    let reg_records_shuffled = shuffler.shuffle(member_count, &ea_pk, &reg_creds, rng)?;

    tracing::info!(target: LOG_TARGET, "Stage 2: tagging shuffled registration records");
    let last_reg = reg_records_shuffled
        .last()
        .expect("chain has one result per member");
    let (reg_cred_tags, reg_cred_tags_proof) = generate_deterministic_tags(
        config.cores,
        &last_reg.shuffled_c1s,
        &last_reg.shuffled_c2s,
        &members,
        rng,
    )?;
    verify_deterministic_tags(
        config.cores,
        &last_reg.shuffled_c1s,
        &last_reg.shuffled_c2s,
        &member_pks,
        &reg_cred_tags_proof,
    )?;

    tracing::info!(
        target: LOG_TARGET,
        records = snapshot.votes.len(),
        "Stage 3: shuffling voting records"
    );
    let (vote_xs, vote_ys) = extract_ballot_sequences(snapshot);
    let vote_records_shuffled =
        shuffler.shuffle_sequences(member_count, &ea_pk, &vote_xs, &vote_ys, rng)?;

    tracing::info!(target: LOG_TARGET, "Stage 4: tagging shuffled voting records");
    let last_votes = vote_records_shuffled
        .last()
        .expect("chain has one result per member");
    let (vote_cred_tags, vote_cred_tags_proof) = generate_deterministic_tags(
        config.cores,
        &last_votes.shuffled_c1s[0],
        &last_votes.shuffled_c2s[0],
        &members,
        rng,
    )?;
    verify_deterministic_tags(
        config.cores,
        &last_votes.shuffled_c1s[0],
        &last_votes.shuffled_c2s[0],
        &member_pks,
        &vote_cred_tags_proof,
    )?;

    tracing::info!(
        target: LOG_TARGET,
        registered = reg_cred_tags.len(),
        "Stage 5: filtering for ballots under registered credentials"
    );
    let registered: HashSet<[u8; 32]> = reg_cred_tags
        .iter()
        .map(|tag| tag.compress().to_bytes())
        .collect();
    let mut real_enc_votes = Vec::new();
    for (index, tag) in vote_cred_tags.iter().enumerate() {
        if !registered.contains(&tag.compress().to_bytes()) {
            continue;
        }
        real_enc_votes.push(ElGamalCiphertext {
            c1: last_votes.shuffled_c1s[1][index],
            c2: last_votes.shuffled_c2s[1][index],
        });
    }

    tracing::info!(
        target: LOG_TARGET,
        ballots = real_enc_votes.len(),
        "Stage 6: decrypting surviving ballots"
    );
    let (real_dec_votes, decryption_proofs) =
        decrypt_votes(ea.key_shares(), &real_enc_votes, rng)?;

    tracing::info!(target: LOG_TARGET, "Stage 7: counting");
    let mut results = BTreeMap::from([(0u8, 0u64), (1u8, 0u64)]);
    for vote in &real_dec_votes {
        *results.entry(*vote).or_insert(0) += 1;
    }
    // Ties break toward the lower option index.
    let winner = if results[&0] >= results[&1] {
        "Option A".to_string()
    } else {
        "Option B".to_string()
    };
    tracing::info!(
        target: LOG_TARGET,
        option_a = results[&0],
        option_b = results[&1],
        winner = %winner,
        "tally complete"
    );

    Ok(Tally {
        reg_records_shuffled,
        vote_records_shuffled,
        reg_cred_tags,
        reg_cred_tags_proof,
        vote_cred_tags,
        vote_cred_tags_proof,
        real_enc_votes,
        real_dec_votes,
        decryption_proofs,
        results,
        winner,
    })
}

/// The two parallel sequences the voting records contribute to the joint
/// shuffle: encrypted credentials and encrypted ballots.
fn extract_ballot_sequences(
    snapshot: &LedgerSnapshot,
) -> (Vec<Vec<RistrettoPoint>>, Vec<Vec<RistrettoPoint>>) {
    let creds: Vec<ElGamalCiphertext> = snapshot
        .votes
        .iter()
        .map(|entry| entry.enc_credential_pk)
        .collect();
    let ballots: Vec<ElGamalCiphertext> = snapshot
        .votes
        .iter()
        .map(|entry| entry.enc_vote)
        .collect();

    let (cred_c1s, cred_c2s) = split_components(&creds);
    let (vote_c1s, vote_c2s) = split_components(&ballots);
    (vec![cred_c1s, vote_c1s], vec![cred_c2s, vote_c2s])
}

/// Re-verifies every transcript a finished tally carries, from the same
/// snapshot it was computed over. This is the observer's entry point: it
/// uses only public data.
pub fn verify_tally(
    config: &Config,
    ea_pk: &RistrettoPoint,
    member_pks: &[RistrettoPoint],
    snapshot: &LedgerSnapshot,
    tally: &Tally,
) -> Result<(), Error> {
    verify_ledger(config.cores, snapshot, ea_pk)?;

    // Replay the registration shuffle chain.
    let mut current: Vec<ElGamalCiphertext> = snapshot
        .registration
        .iter()
        .map(|entry| entry.enc_credential_pk)
        .collect();
    for (member, result) in tally.reg_records_shuffled.iter().enumerate() {
        let outputs = join_components(&result.shuffled_c1s, &result.shuffled_c2s)?;
        match &result.proof {
            crate::MixProof::Local(proof) => {
                crate::verify_shuffle(crate::SINGLE_SHUFFLE_TAG, ea_pk, &current, &outputs, proof)
                    .map_err(|_| Error::proof_member(crate::SINGLE_SHUFFLE_TAG, member as u32))?;
            }
            crate::MixProof::External(_) => {}
        }
        current = outputs;
    }
    let last_reg = tally
        .reg_records_shuffled
        .last()
        .ok_or_else(|| Error::ProtocolMisuse("tally carries no registration shuffle".into()))?;
    let replayed = verify_deterministic_tags(
        config.cores,
        &last_reg.shuffled_c1s,
        &last_reg.shuffled_c2s,
        member_pks,
        &tally.reg_cred_tags_proof,
    )?;
    if replayed != tally.reg_cred_tags {
        return Err(Error::proof("Round2Combined"));
    }

    // Replay the voting-record sequence chain.
    let (mut current_x, mut current_y) = extract_ballot_sequences(snapshot);
    for (member, result) in tally.vote_records_shuffled.iter().enumerate() {
        crate::verify_sequence_shuffle(ea_pk, &current_x, &current_y, result)
            .map_err(|_| Error::proof_member(crate::SEQUENCE_SHUFFLE_TAG, member as u32))?;
        current_x = result.shuffled_c1s.clone();
        current_y = result.shuffled_c2s.clone();
    }
    let last_votes = tally
        .vote_records_shuffled
        .last()
        .ok_or_else(|| Error::ProtocolMisuse("tally carries no voting shuffle".into()))?;
    let replayed = verify_deterministic_tags(
        config.cores,
        &last_votes.shuffled_c1s[0],
        &last_votes.shuffled_c2s[0],
        member_pks,
        &tally.vote_cred_tags_proof,
    )?;
    if replayed != tally.vote_cred_tags {
        return Err(Error::proof("Round2Combined"));
    }

    // Replay the decryption of every surviving ballot.
    if tally.real_enc_votes.len() != tally.decryption_proofs.len()
        || tally.real_enc_votes.len() != tally.real_dec_votes.len()
    {
        return Err(Error::ShapeMismatch(
            "tally decryption transcripts are uneven".into(),
        ));
    }
    for (index, (ciphertext, partials)) in tally
        .real_enc_votes
        .iter()
        .zip(tally.decryption_proofs.iter())
        .enumerate()
    {
        let plaintext = crate::encode_plaintext(tally.real_dec_votes[index])?;
        verify_threshold_decryption(ciphertext, member_pks, partials, &plaintext)?;
    }

    Ok(())
}
