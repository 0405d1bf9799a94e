// The same suite for every backend.  The including module names its backend `B`.

use crate::util::{all_pairs, quick, scenario};
use smokers_rendezvous::{Agent, Backend, RandomPairs, ResourceType, ScriptedPairs,
                         SemIndex, Session, Smoker, Stop, ITEMS};
use std::{thread, time::Duration};


#[test]
fn initial_values() {
    let b = B::create().unwrap();
    for sem in SemIndex::ALL {
        assert_eq!(b.value(sem).unwrap(), sem.initial_value());
    }
    assert_eq!(b.table().present(), [false; ITEMS]);
    assert_eq!(b.table().rounds(), 0);
    assert!(!b.table().is_closed());
    b.destroy().unwrap();
}


#[test]
fn scripted_scenario() {
    let session = Session::<B>::create(&quick(B::KIND, 3)).unwrap();
    let report = session.run_with(ScriptedPairs::new(scenario())).unwrap();

    assert_eq!(report.rounds, 3);
    assert_eq!(report.published, 3);
    assert_eq!(report.stop, Some(Stop::BudgetReached));
    assert!(!report.interrupted);

    let expected = [ResourceType::Match, ResourceType::Tobacco, ResourceType::Paper];
    let woken: Vec<_> = report.publications.iter().map(|p| p.smoker).collect();
    assert_eq!(woken, expected);
    let consumers: Vec<_> = report.consumptions.iter().map(|c| c.smoker).collect();
    assert_eq!(consumers, expected);
    for ((c, p), round) in report.consumptions.iter().zip(&report.publications).zip(1 ..) {
        assert_eq!(c.round, round);
        assert_eq!(p.round, round);
        assert!(c.taken.is(p.pair));
    }
}


#[test]
fn random_rounds_follow_the_mapping() {
    let session = Session::<B>::create(&quick(B::KIND, 12)).unwrap();
    let report = session.run().unwrap();

    assert_eq!(report.rounds, 12);
    assert_eq!(report.published, 12);
    assert_eq!(report.publications.len(), 12);
    assert_eq!(report.consumptions.len(), 12);
    for (c, p) in report.consumptions.iter().zip(&report.publications) {
        assert_eq!(p.smoker, p.pair.eligible());
        assert_eq!(c.smoker, p.smoker);
        assert!(c.taken.completes(c.smoker));
    }
    // Strictly monotonic, one per consumption.
    let rounds: Vec<_> = report.consumptions.iter().map(|c| c.round).collect();
    assert_eq!(rounds, (1 ..= 12).collect::<Vec<_>>());
}


#[test]
fn zero_budget() {
    let report = Session::<B>::create(&quick(B::KIND, 0)).unwrap().run().unwrap();
    assert_eq!(report.rounds, 0);
    assert_eq!(report.published, 0);
    assert!(report.publications.is_empty());
    assert!(report.consumptions.is_empty());
    assert_eq!(report.stop, Some(Stop::BudgetReached));
}


/// Drive both roles by hand, one turn at a time, to see that exactly the eligible smoker is
/// runnable after each publication.
#[test]
fn one_eligible_smoker_per_publication() {
    let b = B::create().unwrap();
    let pairs = all_pairs();
    let mut agent = Agent::new(&b, ScriptedPairs::new(pairs.clone()), u32::MAX);

    for (pair, round) in pairs.iter().zip(1 ..) {
        assert_eq!(agent.step().unwrap(), None);
        let eligible = pair.eligible();
        for r in ResourceType::ALL {
            let expected = u32::from(r == eligible);
            assert_eq!(b.value(SemIndex::Smoker(r)).unwrap(), expected, "{pair}");
        }
        assert_eq!(b.value(SemIndex::Agent).unwrap(), 0);
        assert_eq!(b.table().present().iter().filter(|&&p| p).count(), 2);

        let c = Smoker::new(&b, eligible, Duration::ZERO).step().unwrap().unwrap();
        assert!(c.taken.is(*pair));
        assert_eq!(c.round, round);
        assert_eq!(b.table().present(), [false; ITEMS]);
        assert_eq!(b.value(SemIndex::Agent).unwrap(), 1);
    }
    assert_eq!(b.table().rounds(), 6);
    assert_eq!(agent.publications().len(), 6);
    b.destroy().unwrap();
}


#[test]
fn close_wakes_every_role() {
    let b = B::create().unwrap();
    // Use up the agent's initial turn, so that every role would block.
    b.wait(SemIndex::Agent).unwrap();
    let shared = &b;
    thread::scope(|scope| {
        let waiters: Vec<_> =
            SemIndex::ALL.map(|sem| scope.spawn(move || shared.acquire(sem).unwrap())).into();
        thread::sleep(Duration::from_millis(50));
        assert!(waiters.iter().all(|t| !t.is_finished()));
        assert!(shared.close().unwrap());
        for t in waiters {
            assert!(!t.join().unwrap());
        }
    });
    assert!(!b.close().unwrap());
    b.destroy().unwrap();
}


#[test]
fn closed_roles_stop() {
    let b = B::create().unwrap();
    b.close().unwrap();
    let mut agent = Agent::new(&b, RandomPairs::new(), 5);
    assert_eq!(agent.run().unwrap(), Stop::Cancelled);
    for holds in ResourceType::ALL {
        Smoker::new(&b, holds, Duration::ZERO).run().unwrap();
    }
    assert_eq!(b.table().published(), 0);
    assert_eq!(b.table().rounds(), 0);
    b.destroy().unwrap();
}

