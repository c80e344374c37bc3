//! Pure classification of a job namespace listing.
//!
//! Nothing here talks to the store: a [`Snapshot`] is built from one listing
//! and [`Snapshot::assess`] maps it, together with the job's records, to a
//! phase and the next action. Calling it twice on the same listing gives the
//! same answer.

use std::collections::{BTreeMap, BTreeSet};

use common::{JobData, JobId, JobKey, JobPhase, ObjectInfo, RoundMarker};

/// Job namespace objects, grouped by what their key encodes.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub has_job_data: bool,
    pub has_result: bool,
    /// Map outputs ordered by key.
    pub map_outputs: Vec<ObjectInfo>,
    /// Reduce outputs per round, each ordered by key.
    pub reduce_outputs: BTreeMap<u32, Vec<ObjectInfo>>,
    pub marker_rounds: BTreeSet<u32>,
}

/// What the coordinator should do after looking at a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Next {
    /// Terminal or waiting on tasks in flight.
    Nothing,
    /// Partition `inputs` into the reducers of `round`.
    Schedule { round: u32, inputs: Vec<ObjectInfo> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub phase: JobPhase,
    pub next: Next,
}

impl Snapshot {
    /// Group a listing of `<job>/`. Keys that do not follow the job layout
    /// are ignored.
    pub fn from_listing(job: &JobId, objects: impl IntoIterator<Item = ObjectInfo>) -> Self {
        let mut snapshot = Snapshot::default();
        for object in objects {
            match JobKey::decode(job, &object.key) {
                Some(JobKey::JobData) => snapshot.has_job_data = true,
                Some(JobKey::Result) => snapshot.has_result = true,
                Some(JobKey::MapOutput { .. }) => snapshot.map_outputs.push(object),
                Some(JobKey::ReduceOutput { round, .. }) => {
                    snapshot.reduce_outputs.entry(round).or_default().push(object)
                }
                Some(JobKey::RoundMarker { round }) => {
                    snapshot.marker_rounds.insert(round);
                }
                None => {}
            }
        }
        snapshot.map_outputs.sort_by(|a, b| a.key.cmp(&b.key));
        for outputs in snapshot.reduce_outputs.values_mut() {
            outputs.sort_by(|a, b| a.key.cmp(&b.key));
        }
        snapshot
    }

    /// Highest round a marker exists for.
    pub fn latest_round(&self) -> Option<u32> {
        self.marker_rounds.last().copied()
    }

    pub fn round_outputs(&self, round: u32) -> &[ObjectInfo] {
        self.reduce_outputs
            .get(&round)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Objects consumed by `round`: the map outputs for round 1, the
    /// previous round's outputs after that.
    pub fn round_inputs(&self, round: u32) -> &[ObjectInfo] {
        if round <= 1 {
            &self.map_outputs
        } else {
            self.round_outputs(round - 1)
        }
    }

    /// Classify the job. `latest` is the marker of [`Snapshot::latest_round`],
    /// if any.
    pub fn assess(&self, job_data: &JobData, latest: Option<(u32, &RoundMarker)>) -> Assessment {
        if self.has_result {
            return Assessment {
                phase: JobPhase::Done,
                next: Next::Nothing,
            };
        }

        let mapped = count(self.map_outputs.len());
        if mapped < job_data.map_count {
            return Assessment {
                phase: JobPhase::Mapping {
                    completed: mapped,
                    expected: job_data.map_count,
                },
                next: Next::Nothing,
            };
        }

        let Some((round, marker)) = latest else {
            return Assessment {
                phase: JobPhase::Mapping {
                    completed: mapped,
                    expected: job_data.map_count,
                },
                next: Next::Schedule {
                    round: 1,
                    inputs: self.map_outputs.clone(),
                },
            };
        };

        let expected = marker.reducer_count;
        // A lone reducer writes the result instead of a round slot.
        let completed = if expected == 1 {
            0
        } else {
            count(self.round_outputs(round).len())
        };
        let phase = JobPhase::Reducing {
            round,
            completed,
            expected,
        };

        if expected <= 1 || completed < expected {
            return Assessment {
                phase,
                next: Next::Nothing,
            };
        }

        Assessment {
            phase,
            next: Next::Schedule {
                round: round + 1,
                inputs: self.round_outputs(round).to_vec(),
            },
        }
    }
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}
