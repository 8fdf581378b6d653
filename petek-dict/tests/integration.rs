use petek_dict::Dictionary;
use petek_stm::RetryPolicy;
use proptest::prelude::*;
use std::collections::HashSet;

#[test]
fn test_shared_prefix_diverging_last_character() {
    let dict = Dictionary::new();
    assert!(dict.add("cat"));
    assert!(!dict.add("cat"));
    assert!(dict.add("car"));
    assert!(!dict.add("car"));
    assert!(!dict.contains("ca"));
    assert!(!dict.contains("cart"));
}

#[test]
fn test_branch_insert_orders() {
    let words = ["ab", "ac", "a"];
    let orders = [
        [0, 1, 2],
        [0, 2, 1],
        [1, 0, 2],
        [1, 2, 0],
        [2, 0, 1],
        [2, 1, 0],
    ];

    for order in orders {
        let dict = Dictionary::new();
        for i in order {
            assert!(dict.add(words[i]), "{} reported present in {order:?}", words[i]);
        }
        for word in words {
            assert!(dict.contains(word));
            assert!(!dict.add(word));
        }
        for spurious in ["", "b", "c", "abc", "aa", "ba"] {
            assert!(!dict.contains(spurious), "{spurious:?} present after {order:?}");
        }
    }
}

#[test]
fn test_backoff_policy_behaves_the_same() {
    let dict = Dictionary::with_policy(RetryPolicy::bounded(1_000));
    assert!(dict.add("hive"));
    assert!(!dict.add("hive"));
    assert!(dict.contains("hive"));
    assert!(dict.stats().commits() >= 3);
}

fn arb_words() -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec("[a-d]{0,5}", 0..40)
}

proptest! {
    #[test]
    fn prop_add_reports_first_insertion(words in arb_words()) {
        let dict = Dictionary::new();
        let mut model = HashSet::new();
        for word in &words {
            prop_assert_eq!(dict.add(word), model.insert(word.clone()));
        }
    }

    #[test]
    fn prop_membership_is_order_independent(words in arb_words(), probes in arb_words()) {
        let forward = Dictionary::new();
        let backward = Dictionary::new();
        for word in &words {
            forward.add(word);
        }
        for word in words.iter().rev() {
            backward.add(word);
        }

        for probe in words.iter().chain(probes.iter()) {
            let expected = words.contains(probe);
            prop_assert_eq!(forward.contains(probe), expected);
            prop_assert_eq!(backward.contains(probe), expected);
        }
    }
}
