//! Bike selection policy.

use chrono::{DateTime, Duration, Utc};

use crate::model::Bike;

/// Latest release time that still counts as cooled down at `now`.
pub fn cooled_before(now: DateTime<Utc>, cooldown: Duration) -> DateTime<Utc> {
    window_start(now, cooldown)
}

/// `now - window`, saturating at the earliest representable instant.
pub fn window_start(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    now.checked_sub_signed(window)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// The least-used available bike; ties go to the lowest id.
pub fn select_least_used(bikes: &[Bike], now: DateTime<Utc>, cooldown: Duration) -> Option<&Bike> {
    bikes
        .iter()
        .filter(|b| b.is_available(now, cooldown))
        .min_by_key(|b| (b.usage_count, b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bikepool_id::{BikeId, Ulid};
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn bike(n: u128, usage_count: i64) -> Bike {
        Bike {
            usage_count,
            ..Bike::new(BikeId::from_ulid(Ulid::from(n)))
        }
    }

    #[test]
    fn test_picks_lowest_id_among_least_used() {
        let bikes = vec![bike(1, 3), bike(3, 1), bike(2, 1)];
        let chosen = select_least_used(&bikes, now(), Duration::minutes(5)).unwrap();
        assert_eq!(chosen.id, bikes[2].id);
    }

    #[test]
    fn test_skips_held_and_cooling_bikes() {
        let mut held = bike(1, 0);
        held.held = true;
        let mut cooling = bike(2, 0);
        cooling.last_released_at = Some(now() - Duration::minutes(4));
        let rested = bike(3, 9);

        let bikes = vec![held, cooling, rested];
        let chosen = select_least_used(&bikes, now(), Duration::minutes(5)).unwrap();
        assert_eq!(chosen.id, bikes[2].id);
    }

    #[test]
    fn test_cut_off_saturates_for_huge_windows() {
        assert_eq!(
            cooled_before(now(), Duration::minutes(5)),
            now() - Duration::minutes(5)
        );
        assert_eq!(cooled_before(now(), Duration::MAX), DateTime::<Utc>::MIN_UTC);
        assert_eq!(window_start(now(), Duration::MAX), DateTime::<Utc>::MIN_UTC);
    }

    #[test]
    fn test_none_when_nothing_available() {
        let mut held = bike(1, 0);
        held.held = true;
        assert!(select_least_used(&[held], now(), Duration::minutes(5)).is_none());
        assert!(select_least_used(&[], now(), Duration::minutes(5)).is_none());
    }

    proptest! {
        #[test]
        fn chosen_bike_is_minimal_among_available(
            specs in prop::collection::vec((0u128..64, 0i64..5, any::<bool>(), prop::option::of(0i64..600)), 0..12)
        ) {
            let cooldown = Duration::minutes(5);
            let bikes: Vec<Bike> = specs
                .iter()
                .map(|(n, usage, held, released_secs_ago)| Bike {
                    id: BikeId::from_ulid(Ulid::from(*n)),
                    held: *held,
                    usage_count: *usage,
                    last_released_at: released_secs_ago.map(|s| now() - Duration::seconds(s)),
                })
                .collect();

            match select_least_used(&bikes, now(), cooldown) {
                Some(chosen) => {
                    prop_assert!(chosen.is_available(now(), cooldown));
                    for other in bikes.iter().filter(|b| b.is_available(now(), cooldown)) {
                        prop_assert!((chosen.usage_count, chosen.id) <= (other.usage_count, other.id));
                    }
                }
                None => prop_assert!(bikes.iter().all(|b| !b.is_available(now(), cooldown))),
            }
        }
    }
}
