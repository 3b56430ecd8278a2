use super::{AdEntry, Detection, NearestFrames, NearestMatch};
use crate::{Config, Result};

/// State of a [SequenceTracker].
#[derive(Clone, Debug, PartialEq)]
pub enum TrackerState {
    /// Not tracking a candidate airing.
    Idle,
    /// Tracking a candidate airing that started at broadcast frame `match_start`.
    Matching {
        /// Ad frame index (1-based) the tracker expects next.
        sequence_position: u64,
        match_start: usize,
        name_fail_score: f64,
        sequence_fail_score: f64,
    },
}

impl TrackerState {
    pub fn is_matching(&self) -> bool {
        matches!(self, TrackerState::Matching { .. })
    }
}

/// Turns a stream of [NearestMatch] labels into completed airings of a single ad.
///
/// While matching, the tracker keeps two fail scores. The name score grows by one for every
/// broadcast frame whose nearest ad is a different ad. The sequence score grows when the
/// matched ad frame jumps too far ahead or moves backwards. Good frames decay both scores,
/// never below zero. Crossing either limit abandons the candidate; advancing close enough
/// to the end of the ad completes it.
#[derive(Debug)]
pub struct SequenceTracker<'a> {
    ad_name: &'a str,
    sampled_len: u64,
    config: &'a Config,
    state: TrackerState,
}

impl<'a> SequenceTracker<'a> {
    pub fn new(ad_name: &'a str, sampled_len: usize, config: &'a Config) -> Self {
        Self {
            ad_name,
            sampled_len: sampled_len as u64,
            config,
            state: TrackerState::Idle,
        }
    }

    pub fn ad_name(&self) -> &str {
        self.ad_name
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    /// Consumes the nearest match of broadcast frame `frame`.
    ///
    /// Returns the broadcast frame at which a completed airing started, if this frame
    /// completes one.
    pub fn step(&mut self, frame: usize, nearest: &NearestMatch) -> Option<usize> {
        let config = self.config;

        if nearest.ad_name == self.ad_name {
            let index = nearest.frame;
            match self.state {
                TrackerState::Idle => {
                    if index < config.match_start_error_margin as u64 {
                        self.state = TrackerState::Matching {
                            sequence_position: index,
                            match_start: frame,
                            name_fail_score: 0.0,
                            sequence_fail_score: 0.0,
                        };
                    }
                }
                TrackerState::Matching {
                    ref mut sequence_position,
                    ref mut name_fail_score,
                    ref mut sequence_fail_score,
                    ..
                } => {
                    if index >= *sequence_position {
                        *name_fail_score = (*name_fail_score - config.name_fail_forgiveness).max(0.0);
                        if index > *sequence_position + config.sequence_overshoot_window as u64 {
                            *sequence_fail_score += (index - *sequence_position) as f64
                                * config.sequence_overshoot_factor;
                        } else {
                            *sequence_fail_score = (*sequence_fail_score
                                - config.sequence_fail_forgiveness)
                                .max(0.0);
                        }
                        *sequence_position += 1;
                    } else {
                        *sequence_fail_score += config.sequence_undershoot_penalty;
                    }
                }
            }
        } else if let TrackerState::Matching {
            ref mut name_fail_score,
            ..
        } = self.state
        {
            *name_fail_score += 1.0;
        }

        // Failure is checked before completion: a frame that trips both abandons the candidate.
        match self.state {
            TrackerState::Matching {
                name_fail_score,
                sequence_fail_score,
                match_start,
                ..
            } if name_fail_score > config.name_fail_limit
                || sequence_fail_score > config.sequence_fail_limit =>
            {
                tracing::trace!(
                    ad = self.ad_name,
                    frame,
                    match_start,
                    name_fail_score,
                    sequence_fail_score,
                    "abandoned candidate airing"
                );
                self.state = TrackerState::Idle;
                None
            }
            TrackerState::Matching {
                sequence_position,
                match_start,
                ..
            } if sequence_position as i64
                > self.sampled_len as i64 - config.match_end_error_margin as i64 =>
            {
                self.state = TrackerState::Idle;
                Some(match_start)
            }
            _ => None,
        }
    }
}

/// Runs a [SequenceTracker] for one ad over a broadcast's nearest matches and converts every
/// completed airing into a [Detection].
pub fn track(
    ad_name: &str,
    ad: &AdEntry,
    nearest: &NearestFrames,
    config: &Config,
) -> Result<Vec<Detection>> {
    let span = tracing::span!(tracing::Level::TRACE, "track", ad = ad_name);
    let _enter = span.enter();

    let fps = nearest.fps()?;
    let mut tracker = SequenceTracker::new(ad_name, ad.sampled_len(), config);
    let mut detections = Vec::new();

    for (i, m) in nearest.matches.iter().enumerate() {
        if let Some(start) = tracker.step(i, m) {
            let detection = Detection {
                broadcast: nearest.broadcast.clone(),
                start_secs: (start as u64 * nearest.sample_rate as u64) as f64 / fps,
                ad_duration_secs: ad.duration_secs(),
                ad_name: ad_name.to_string(),
            };
            tracing::debug!(
                ad = ad_name,
                start_frame = start,
                end_frame = i,
                start_secs = detection.start_secs,
                "detected ad"
            );
            detections.push(detection);
        }
    }

    Ok(detections)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::detect::{AdCatalog, AdInfo};

    fn stream(labels: &[(&str, u64)]) -> Vec<NearestMatch> {
        labels
            .iter()
            .map(|(name, frame)| NearestMatch::new(*name, *frame))
            .collect()
    }

    fn run(tracker: &mut SequenceTracker, labels: &[(&str, u64)]) -> Vec<(usize, usize)> {
        stream(labels)
            .iter()
            .enumerate()
            .filter_map(|(i, m)| tracker.step(i, m).map(|start| (start, i)))
            .collect()
    }

    fn scores(state: &TrackerState) -> (u64, f64, f64) {
        match *state {
            TrackerState::Matching {
                sequence_position,
                name_fail_score,
                sequence_fail_score,
                ..
            } => (sequence_position, name_fail_score, sequence_fail_score),
            TrackerState::Idle => panic!("tracker is idle"),
        }
    }

    #[test]
    fn test_single_frame_completion() {
        // 5 sampled frames and an end margin of 5: the threshold is 0, so the airing
        // completes on the frame that starts it.
        let config = Config::default()
            .with_match_start_error_margin(2)
            .with_match_end_error_margin(5);
        let mut tracker = SequenceTracker::new("ad", 5, &config);

        let found = run(
            &mut tracker,
            &[("ad", 1), ("ad", 2), ("ad", 3), ("ad", 4), ("ad", 5)],
        );
        assert_eq!(found, vec![(0, 0)]);
        assert_eq!(*tracker.state(), TrackerState::Idle);

        // With the default start margin every index below 5 restarts and completes at once.
        let config = Config::default().with_match_end_error_margin(5);
        let mut tracker = SequenceTracker::new("ad", 5, &config);
        let found = run(
            &mut tracker,
            &[("ad", 1), ("ad", 2), ("ad", 3), ("ad", 4), ("ad", 5)],
        );
        assert_eq!(found, vec![(0, 0), (1, 1), (2, 2), (3, 3)]);
        assert_eq!(*tracker.state(), TrackerState::Idle);
    }

    #[test]
    fn test_full_airing() {
        let config = Config::default();
        let mut tracker = SequenceTracker::new("ad", 20, &config);

        let mut labels = vec![("other", 3), ("other", 9)];
        labels.extend((1..=20).map(|i| ("ad", i)));
        let found = run(&mut tracker, &labels);

        // Position passes 20 - 5 = 15 on ad frame 16, which is broadcast frame 17.
        assert_eq!(found, vec![(2, 17)]);
    }

    #[test]
    fn test_start_requires_margin() {
        let config = Config::default();
        let mut tracker = SequenceTracker::new("ad", 20, &config);

        tracker.step(0, &NearestMatch::new("ad", 5));
        assert_eq!(*tracker.state(), TrackerState::Idle);
        tracker.step(1, &NearestMatch::new("ad", 4));
        assert!(tracker.state().is_matching());
        assert_eq!(scores(tracker.state()).0, 4);
    }

    #[test]
    fn test_name_mismatch_resets() {
        let config = Config::default();
        let mut tracker = SequenceTracker::new("ad", 50, &config);

        tracker.step(0, &NearestMatch::new("ad", 1));
        for i in 1..=4 {
            tracker.step(i, &NearestMatch::new("other", 7));
            assert!(tracker.state().is_matching());
            assert_eq!(scores(tracker.state()).1, i as f64);
        }
        // The fifth mismatch pushes the name score past the limit of 4.
        assert_eq!(tracker.step(5, &NearestMatch::new("other", 7)), None);
        assert_eq!(*tracker.state(), TrackerState::Idle);

        // Nothing is emitted for the abandoned attempt, and the next attempt starts clean.
        tracker.step(6, &NearestMatch::new("ad", 2));
        assert_eq!(scores(tracker.state()), (2, 0.0, 0.0));
    }

    #[test]
    fn test_undershoot_resets_at_crossing_frame() {
        let config = Config::default();
        let mut tracker = SequenceTracker::new("ad", 100, &config);

        tracker.step(0, &NearestMatch::new("ad", 3));
        // Each backward jump adds 0.5; the limit of 10 is exceeded on the 21st.
        for i in 1..=20 {
            tracker.step(i, &NearestMatch::new("ad", 1));
            assert!(tracker.state().is_matching(), "reset too early at frame {}", i);
            assert_eq!(scores(tracker.state()), (3, 0.0, i as f64 * 0.5));
        }
        tracker.step(21, &NearestMatch::new("ad", 1));
        assert_eq!(*tracker.state(), TrackerState::Idle);
    }

    #[test]
    fn test_overshoot_penalty() {
        let config = Config::default();
        let mut tracker = SequenceTracker::new("ad", 100, &config);

        tracker.step(0, &NearestMatch::new("ad", 1));
        tracker.step(1, &NearestMatch::new("other", 1));
        assert_eq!(scores(tracker.state()), (1, 1.0, 0.0));

        // 1 + 5 is still inside the window.
        tracker.step(2, &NearestMatch::new("ad", 6));
        let (position, name_fail, sequence_fail) = scores(tracker.state());
        assert_eq!(position, 2);
        assert!((name_fail - 0.8).abs() < 1e-9);
        assert_eq!(sequence_fail, 0.0);

        // 12 > 2 + 5: overshoot by 10 frames.
        tracker.step(3, &NearestMatch::new("ad", 12));
        let (position, name_fail, sequence_fail) = scores(tracker.state());
        assert_eq!(position, 3);
        assert!((name_fail - 0.6).abs() < 1e-9);
        assert!((sequence_fail - 10.0 * config.sequence_overshoot_factor).abs() < 1e-9);
    }

    #[test]
    fn test_forgiveness_floors_at_zero() {
        let config = Config::default();
        let mut tracker = SequenceTracker::new("ad", 100, &config);

        tracker.step(0, &NearestMatch::new("ad", 1));
        for i in 1..30 {
            tracker.step(i, &NearestMatch::new("ad", i as u64 + 1));
            let (_, name_fail, sequence_fail) = scores(tracker.state());
            assert_eq!(name_fail, 0.0);
            assert_eq!(sequence_fail, 0.0);
        }
    }

    #[test]
    fn test_failure_wins_over_completion() {
        let config = Config::default()
            .with_match_end_error_margin(0)
            .with_sequence_fail_limit(1.0);
        let mut tracker = SequenceTracker::new("ad", 3, &config);

        tracker.step(0, &NearestMatch::new("ad", 1));
        // Position 3 is one step short of completing. Jumping far ahead both completes
        // (position 4 > 3) and fails (score 3.6 > 1) on the same frame.
        tracker.step(1, &NearestMatch::new("ad", 2));
        tracker.step(2, &NearestMatch::new("ad", 3));
        assert_eq!(scores(tracker.state()).0, 3);
        assert_eq!(tracker.step(3, &NearestMatch::new("ad", 21)), None);
        assert_eq!(*tracker.state(), TrackerState::Idle);
    }

    #[test]
    fn test_track_start_time() {
        let config = Config::default();
        let mut catalog = AdCatalog::new();
        // 60 original frames at sample rate 10: 6 sampled frames, threshold 6 - 5 = 1.
        catalog.insert_info(AdInfo::new("ad", 60, 2000), config.sample_rate);
        let nearest = NearestFrames {
            broadcast: "show".to_string(),
            total_frames: 300,
            duration_ms: 10_000,
            sample_rate: 10,
            resize: (16, 16),
            matches: stream(&[("x", 1), ("x", 1), ("x", 1), ("ad", 1), ("ad", 2)]),
        };

        let detections = track("ad", catalog.get("ad").unwrap(), &nearest, &config).unwrap();
        assert_eq!(detections.len(), 1);
        // Broadcast frame 3 is original frame 30 at 30 fps.
        assert_eq!(detections[0].start_secs, 1.0);
        assert_eq!(detections[0].ad_duration_secs, 2.0);
        assert_eq!(detections[0].ad_name, "ad");
        assert_eq!(detections[0].broadcast, "show");
    }
}
