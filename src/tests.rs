use super::*;

use curve25519_dalek::ristretto::RistrettoPoint;
use curve25519_dalek::scalar::Scalar;

/// A complete election fixture: registered voters with real and fake
/// credentials, activated materials, and one ballot per credential (real
/// credentials vote 0, fake credentials vote 1).
struct TestElection {
    config: Config,
    ea: ElectionAuthority,
    ledger: Ledger,
    /// Continuation stream for the tally, derived from the same seed.
    rng: RandomStream,
}

/// Runs registration and voting for `voters` voters with `fakes` fake
/// credentials each. When `register_fakes` is set, every fake credential
/// is also checked out under a synthetic voter id, placing it on the
/// registration ledger alongside the real ones.
fn run_election(
    seed: &str,
    voters: u64,
    fakes: u64,
    members: u32,
    register_fakes: bool,
) -> TestElection {
    let config = Config {
        ea_members: members,
        voters,
        fake_credential_count: fakes,
        seed: seed.to_string(),
        ..Config::default()
    };
    let mut rng = config.random_stream();

    let ea = ElectionAuthority::new(members, &mut rng).unwrap();
    let ea_pk = ea.public_key();
    let official = ElectionOfficial::new(&mut rng);
    let kiosk = Kiosk::new(&mut rng);
    let printer = EnvelopePrinter::new(&mut rng);
    let mut ledger = Ledger::new();

    let mut synthetic_id = 10_000;
    for voter in 0..voters {
        let voter_id = voter + 1;

        let envelope = printer.issue_envelope(&mut ledger, &mut rng);
        let real = kiosk
            .issue_real_credential(voter_id, &ea_pk, &envelope, &mut ledger, &mut rng)
            .unwrap();

        let mut fake_materials = Vec::new();
        for _ in 0..fakes {
            let envelope = printer.issue_envelope(&mut ledger, &mut rng);
            let fake = kiosk
                .issue_fake_credential(voter_id, &real, &ea_pk, &envelope, &mut ledger, &mut rng)
                .unwrap();
            fake_materials.push(fake);
        }

        official.check_out(&real.ticket, &mut ledger).unwrap();
        activate(&mut ledger, &ea_pk, &real).unwrap();
        for fake in &fake_materials {
            activate(&mut ledger, &ea_pk, fake).unwrap();
        }

        if register_fakes {
            for fake in &fake_materials {
                let (ticket, _) = kiosk.issue_check_out_ticket(
                    synthetic_id,
                    &fake.credential.public_key(),
                    &ea_pk,
                    &mut rng,
                );
                official.check_out(&ticket, &mut ledger).unwrap();
                synthetic_id += 1;
            }
        }

        // Real credentials vote for option A, fake credentials for B.
        let ballot = cast_vote(&ea_pk, &real.credential, 0, &mut rng).unwrap();
        ledger.append_vote_record(ballot);
        for fake in &fake_materials {
            let ballot = cast_vote(&ea_pk, &fake.credential, 1, &mut rng).unwrap();
            ledger.append_vote_record(ballot);
        }
    }

    TestElection {
        config,
        ea,
        ledger,
        rng,
    }
}

#[test]
fn smoke_tally_counts_registered_fakes() {
    // 2 voters, 4 tally members, 1 fake per voter, fakes registered: both
    // kinds of ballot survive filtering, and the 2-2 tie breaks toward
    // option A.
    let mut e = run_election("scenario-smoke", 2, 1, 4, true);
    let snapshot = e.ledger.snapshot();
    let tally = run_tally(&e.config, &e.ea, &snapshot, &mut e.rng).unwrap();

    assert_eq!(tally.results[&0], 2);
    assert_eq!(tally.results[&1], 2);
    assert_eq!(tally.winner, "Option A");
    assert_eq!(tally.real_enc_votes.len(), 4);
}

#[test]
fn coercion_resistance_filters_unregistered_fakes() {
    // 3 voters, 3 members, 1 fake per voter. The fakes are on the public
    // credential list (their ballots verify) but never on the
    // registration ledger, so their tags match no registration tag and
    // the coerced ballots disappear from the count.
    let mut e = run_election("scenario-coercion", 3, 1, 3, false);
    let snapshot = e.ledger.snapshot();
    let tally = run_tally(&e.config, &e.ea, &snapshot, &mut e.rng).unwrap();

    assert_eq!(tally.results[&0], 3);
    assert_eq!(tally.results[&1], 0);
    assert_eq!(tally.winner, "Option A");

    // All six ballots were tagged; only the three real ones survived.
    assert_eq!(tally.vote_cred_tags.len(), 6);
    assert_eq!(tally.real_enc_votes.len(), 3);

    let registered: std::collections::HashSet<[u8; 32]> = tally
        .reg_cred_tags
        .iter()
        .map(|tag| tag.compress().to_bytes())
        .collect();
    let unmatched = tally
        .vote_cred_tags
        .iter()
        .filter(|tag| !registered.contains(&tag.compress().to_bytes()))
        .count();
    assert_eq!(unmatched, 3);
}

#[test]
fn shuffle_permutation_varies_with_the_seed() {
    // Fixed ledger, varying shuffle seed: the observed permutation of the
    // decrypted credential column must change with the seed while the
    // multiset of plaintexts is preserved.
    let e = run_election("scenario-unlinkability", 5, 0, 2, false);
    let snapshot = e.ledger.snapshot();
    let ea_pk = e.ea.public_key();
    let full_sk: Scalar = e.ea.key_shares().iter().map(|share| share.sk).sum();

    let creds: Vec<ElGamalCiphertext> = snapshot
        .votes
        .iter()
        .map(|entry| entry.enc_credential_pk)
        .collect();
    let ballots: Vec<ElGamalCiphertext> =
        snapshot.votes.iter().map(|entry| entry.enc_vote).collect();
    let (cred_c1s, cred_c2s) = split_components(&creds);
    let (vote_c1s, vote_c2s) = split_components(&ballots);
    let xs = vec![cred_c1s, vote_c1s];
    let ys = vec![cred_c2s, vote_c2s];

    let mut observed_orders = Vec::new();
    for seed in ["unlink-a", "unlink-b", "unlink-c"] {
        let mut rng = RandomStream::from_seed(seed);
        let chain = LocalShuffler
            .shuffle_sequences(2, &ea_pk, &xs, &ys, &mut rng)
            .unwrap();
        let last = chain.last().unwrap();
        let shuffled = join_components(&last.shuffled_c1s[0], &last.shuffled_c2s[0]).unwrap();
        let order: Vec<[u8; 32]> = shuffled
            .iter()
            .map(|ct| ct.decrypt(&full_sk).compress().to_bytes())
            .collect();
        observed_orders.push(order);
    }

    // Same credentials in every run...
    let mut reference = observed_orders[0].clone();
    reference.sort_unstable();
    for order in &observed_orders {
        let mut sorted = order.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, reference);
    }
    // ...but not in the same positions.
    assert!(
        observed_orders[0] != observed_orders[1] || observed_orders[0] != observed_orders[2],
        "three seeds produced the identical permutation"
    );
}

#[test]
fn corrupted_registration_record_aborts_the_tally() {
    let mut e = run_election("scenario-ledger-reject", 2, 1, 2, false);
    let mut snapshot = e.ledger.snapshot();

    // Replace one registration ciphertext component with a random point.
    let mut tamper_rng = RandomStream::from_seed("ledger-reject-tamper");
    snapshot.registration[0].enc_credential_pk.c2 =
        RistrettoPoint::mul_base(&random_scalar(&mut tamper_rng));

    let err = run_tally(&e.config, &e.ea, &snapshot, &mut e.rng).unwrap_err();
    assert!(matches!(err, Error::LedgerInvariant(_)));
}

#[test]
fn tampered_tag_transcript_fails_observer_verification() {
    let mut e = run_election("scenario-proof-tamper", 2, 1, 3, false);
    let snapshot = e.ledger.snapshot();
    let mut tally = run_tally(&e.config, &e.ea, &snapshot, &mut e.rng).unwrap();

    verify_tally(
        &e.config,
        &e.ea.public_key(),
        &e.ea.member_public_keys(),
        &snapshot,
        &tally,
    )
    .unwrap();

    // One flipped byte in one member's combined re-masking proof.
    tally.reg_cred_tags_proof.round2_bundles[1].proofs[0][7] ^= 0x01;
    let err = verify_tally(
        &e.config,
        &e.ea.public_key(),
        &e.ea.member_public_keys(),
        &snapshot,
        &tally,
    )
    .unwrap_err();
    assert!(matches!(
        err,
        Error::ProofInvalid {
            member: Some(2),
            index: Some(0),
            ..
        }
    ));
}

#[test]
fn undecodable_ballot_aborts_decryption() {
    // A ciphertext that decrypts to neither identity nor generator,
    // injected past the ballot-proof checks.
    let mut rng = RandomStream::from_seed("scenario-undecodable");
    let ea = ElectionAuthority::new(3, &mut rng).unwrap();

    let good = create_vote_with_proof(&ea.public_key(), 1, &mut rng).unwrap().0;
    let garbage_plaintext = RistrettoPoint::mul_base(&Scalar::from(2u64));
    let (bad, _, _) = encrypt_point(&ea.public_key(), &garbage_plaintext, &mut rng);

    let err = decrypt_votes(ea.key_shares(), &[good, bad], &mut rng).unwrap_err();
    assert!(matches!(err, Error::DecryptionImpossible { index: 1 }));
}

#[test]
fn registration_order_does_not_affect_the_count() {
    let e = run_election("scenario-order", 3, 1, 2, false);
    let snapshot = e.ledger.snapshot();

    let mut reversed = snapshot.clone();
    reversed.registration.reverse();

    let mut rng_a = RandomStream::from_seed("order-tally");
    let mut rng_b = RandomStream::from_seed("order-tally");
    let tally_a = run_tally(&e.config, &e.ea, &snapshot, &mut rng_a).unwrap();
    let tally_b = run_tally(&e.config, &e.ea, &reversed, &mut rng_b).unwrap();

    assert_eq!(tally_a.results, tally_b.results);
    assert_eq!(tally_a.winner, tally_b.winner);
}

#[test]
fn worker_count_does_not_affect_the_outcome() {
    let e = run_election("scenario-parallel", 2, 1, 2, false);
    let snapshot = e.ledger.snapshot();

    let sequential = Config {
        cores: 1,
        ..e.config.clone()
    };
    let parallel = Config {
        cores: 8,
        ..e.config.clone()
    };

    let mut rng_a = RandomStream::from_seed("parallel-tally");
    let mut rng_b = RandomStream::from_seed("parallel-tally");
    let tally_a = run_tally(&sequential, &e.ea, &snapshot, &mut rng_a).unwrap();
    let tally_b = run_tally(&parallel, &e.ea, &snapshot, &mut rng_b).unwrap();

    assert_eq!(tally_a.reg_cred_tags, tally_b.reg_cred_tags);
    assert_eq!(tally_a.vote_cred_tags, tally_b.vote_cred_tags);
    assert_eq!(tally_a.results, tally_b.results);
}

#[test]
fn ledger_verification_is_idempotent() {
    let e = run_election("scenario-idempotent", 2, 1, 2, false);
    let snapshot = e.ledger.snapshot();

    verify_ledger(e.config.cores, &snapshot, &e.ea.public_key()).unwrap();
    verify_ledger(e.config.cores, &snapshot, &e.ea.public_key()).unwrap();
}

#[test]
fn too_few_records_is_a_protocol_misuse() {
    let mut e = run_election("scenario-too-few", 1, 0, 2, false);
    let snapshot = e.ledger.snapshot();
    let err = run_tally(&e.config, &e.ea, &snapshot, &mut e.rng).unwrap_err();
    assert!(matches!(err, Error::ProtocolMisuse(_)));
}

#[cfg(unix)]
mod external_backend {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    fn write_tool(dir: &std::path::Path, name: &str, script: &str) -> std::path::PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, script).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    const MOCK_TOOL: &str = r##"#!/bin/sh
cmd="$1"; shift
IN=""; OUT=""; PROOF=""
while [ "$#" -gt 0 ]; do
  case "$1" in
    --in) IN="$2"; shift 2 ;;
    --out) OUT="$2"; shift 2 ;;
    --proof) PROOF="$2"; shift 2 ;;
    --pk|--perm|--rand) shift 2 ;;
    *) shift ;;
  esac
done
case "$cmd" in
  shuffle) cp "$IN" "$OUT"; printf 'mock-proof' > "$PROOF" ;;
  prove) printf 'mock-proof' > "$PROOF" ;;
  verify) : ;;
  *) echo "unknown command $cmd" >&2; exit 2 ;;
esac
"##;

    const BROKEN_TOOL: &str = r##"#!/bin/sh
echo "shuffle tool exploded" >&2
exit 3
"##;

    #[test]
    fn external_process_contract_round_trip() {
        let dir = std::env::temp_dir().join(format!("votegral-ext-{}", std::process::id()));
        let tool = write_tool(&dir, "mock_shuffle.sh", MOCK_TOOL);

        let mut rng = RandomStream::from_seed("external-roundtrip");
        let pk = RistrettoPoint::mul_base(&random_scalar(&mut rng));
        let ciphertexts: Vec<ElGamalCiphertext> = (0..3)
            .map(|_| encrypt_point(&pk, &generator(), &mut rng).0)
            .collect();

        let shuffler = ExternalShuffler {
            tool,
            temp_path: dir.clone(),
        };
        let results = shuffler.shuffle(2, &pk, &ciphertexts, &mut rng).unwrap();
        assert_eq!(results.len(), 2);

        // The mock tool echoes its input, so the file protocol must
        // round-trip the ciphertexts exactly.
        let echoed =
            join_components(&results[0].shuffled_c1s, &results[0].shuffled_c2s).unwrap();
        assert_eq!(echoed, ciphertexts);
        match &results[0].proof {
            MixProof::External(bytes) => assert_eq!(bytes.as_slice(), b"mock-proof"),
            MixProof::Local(_) => panic!("expected an external proof"),
        }
    }

    #[test]
    fn external_sequence_shuffle_permutes_locally_and_proves_externally() {
        let dir = std::env::temp_dir().join(format!("votegral-extseq-{}", std::process::id()));
        let tool = write_tool(&dir, "mock_shuffle.sh", MOCK_TOOL);

        let mut rng = RandomStream::from_seed("external-sequences");
        let sk = random_scalar(&mut rng);
        let pk = RistrettoPoint::mul_base(&sk);
        let row: Vec<ElGamalCiphertext> = (0..4)
            .map(|_| {
                let m = RistrettoPoint::mul_base(&random_scalar(&mut rng));
                encrypt_point(&pk, &m, &mut rng).0
            })
            .collect();
        let (xs, ys) = split_components(&row);

        let shuffler = ExternalShuffler {
            tool,
            temp_path: dir.clone(),
        };
        let results = shuffler
            .shuffle_sequences(1, &pk, &[xs], &[ys], &mut rng)
            .unwrap();
        assert_eq!(results.len(), 1);

        // The permutation itself happens in-process; plaintexts survive.
        let shuffled =
            join_components(&results[0].shuffled_c1s[0], &results[0].shuffled_c2s[0]).unwrap();
        let mut decrypted: Vec<[u8; 32]> = shuffled
            .iter()
            .map(|ct| ct.decrypt(&sk).compress().to_bytes())
            .collect();
        let mut expected: Vec<[u8; 32]> = row
            .iter()
            .map(|ct| ct.decrypt(&sk).compress().to_bytes())
            .collect();
        decrypted.sort_unstable();
        expected.sort_unstable();
        assert_eq!(decrypted, expected);
    }

    #[test]
    fn failing_tool_surfaces_its_stderr() {
        let dir = std::env::temp_dir().join(format!("votegral-extfail-{}", std::process::id()));
        let tool = write_tool(&dir, "broken_shuffle.sh", BROKEN_TOOL);

        let mut rng = RandomStream::from_seed("external-failure");
        let pk = RistrettoPoint::mul_base(&random_scalar(&mut rng));
        let ciphertexts = vec![encrypt_point(&pk, &generator(), &mut rng).0];

        let shuffler = ExternalShuffler {
            tool,
            temp_path: dir.clone(),
        };
        let err = shuffler
            .shuffle(1, &pk, &ciphertexts, &mut rng)
            .unwrap_err();
        match err {
            Error::BackendFailure(message) => assert!(message.contains("exploded")),
            other => panic!("expected a backend failure, got {:?}", other),
        }
    }
}
