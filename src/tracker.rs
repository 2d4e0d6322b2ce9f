use std::path::Path;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{FromRow, QueryBuilder, Sqlite};

use crate::error::MinerError;
use crate::model::{Challenge, Solution, SolutionStatus, WorkStatus};

/// Durable wallet/challenge/work/solution store backed by an embedded
/// SQLite database with WAL journaling. All writes go through this single
/// connection pool; sqlx's WAL mode lets reads proceed without blocking on
/// in-flight writers.
pub struct Tracker {
    pool: sqlx::SqlitePool,
}

#[derive(FromRow)]
struct ChallengeRow {
    challenge_id: String,
    day: i64,
    challenge_number: i64,
    difficulty: String,
    no_pre_mine: String,
    no_pre_mine_hour: String,
    latest_submission: String,
}

impl From<ChallengeRow> for Challenge {
    fn from(row: ChallengeRow) -> Self {
        Challenge {
            challenge_id: row.challenge_id,
            day: row.day,
            challenge_number: row.challenge_number,
            difficulty: row.difficulty,
            no_pre_mine: row.no_pre_mine,
            no_pre_mine_hour: row.no_pre_mine_hour,
            latest_submission: row.latest_submission,
        }
    }
}

#[derive(FromRow)]
struct SolutionRow {
    nonce_hex: String,
    hash_hex: String,
    tries: i64,
}

impl From<SolutionRow> for Solution {
    fn from(row: SolutionRow) -> Self {
        Solution {
            nonce_hex: row.nonce_hex,
            hash_hex: row.hash_hex,
            tries: row.tries as u64,
        }
    }
}

impl Tracker {
    /// Opens (creating if necessary) the database at `db_path` and applies
    /// the schema. `db_path` is typically `db/<project>.sqlite3`.
    pub async fn open(db_path: &Path) -> Result<Self, MinerError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        // A single connection keeps the serialized-write discipline explicit
        // rather than relying on sqlx's pool to paper over SQLite's
        // one-writer-at-a-time model.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let tracker = Self { pool };
        tracker.migrate().await?;
        Ok(tracker)
    }

    async fn migrate(&self) -> Result<(), MinerError> {
        sqlx::query("CREATE TABLE IF NOT EXISTS wallet (address TEXT PRIMARY KEY)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS challenge (
                challenge_id TEXT PRIMARY KEY,
                day INTEGER NOT NULL,
                challenge_number INTEGER NOT NULL,
                difficulty TEXT NOT NULL,
                no_pre_mine TEXT NOT NULL,
                no_pre_mine_hour TEXT NOT NULL,
                latest_submission TEXT NOT NULL,
                latest_submission_dt TEXT NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS work (
                address TEXT NOT NULL,
                challenge_id TEXT NOT NULL,
                status TEXT NOT NULL,
                PRIMARY KEY (address, challenge_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS solution (
                address TEXT NOT NULL,
                challenge_id TEXT NOT NULL,
                nonce_hex TEXT NOT NULL,
                hash_hex TEXT NOT NULL,
                tries INTEGER NOT NULL,
                status TEXT NOT NULL,
                PRIMARY KEY (address, challenge_id, nonce_hex)
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_work_address_status ON work(address, status)")
            .execute(&self.pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_solution_status ON solution(address, challenge_id, status)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_challenge_latest_submission ON challenge(latest_submission_dt)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // -------------------------
    // wallet
    // -------------------------

    pub async fn add_wallet(&self, address: &str) -> Result<bool, MinerError> {
        let res = sqlx::query("INSERT OR IGNORE INTO wallet(address) VALUES (?)")
            .bind(address)
            .execute(&self.pool)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    pub async fn list_wallets(&self, limit: Option<i64>) -> Result<Vec<String>, MinerError> {
        let rows: Vec<(String,)> = match limit {
            Some(n) => {
                sqlx::query_as("SELECT address FROM wallet LIMIT ?")
                    .bind(n)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => sqlx::query_as("SELECT address FROM wallet").fetch_all(&self.pool).await?,
        };
        Ok(rows.into_iter().map(|(a,)| a).collect())
    }

    // -------------------------
    // challenge
    // -------------------------

    /// Inserts `challenge` if its id is new. Returns `false` on a duplicate,
    /// matching the original insert-ignore semantics.
    pub async fn add_challenge(&self, challenge: &Challenge) -> Result<bool, MinerError> {
        let dt = challenge.latest_submission_dt().to_rfc3339();
        let res = sqlx::query(
            "INSERT OR IGNORE INTO challenge
                (challenge_id, day, challenge_number, difficulty, no_pre_mine, no_pre_mine_hour, latest_submission, latest_submission_dt)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&challenge.challenge_id)
        .bind(challenge.day)
        .bind(challenge.challenge_number)
        .bind(&challenge.difficulty)
        .bind(&challenge.no_pre_mine)
        .bind(&challenge.no_pre_mine_hour)
        .bind(&challenge.latest_submission)
        .bind(dt)
        .execute(&self.pool)
        .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Challenges not excluded by an existing `Work` row in a status outside
    /// `statuses`, still valid (10s margin), ordered by nearest deadline
    /// first.
    async fn query_challenges(
        &self,
        address: &str,
        statuses: &[WorkStatus],
    ) -> Result<Vec<Challenge>, MinerError> {
        let threshold = (Utc::now() + ChronoDuration::seconds(10)).to_rfc3339();
        let allowed: Vec<&'static str> = statuses.iter().map(|s| s.as_str()).collect();

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT c.challenge_id, c.day, c.challenge_number, c.difficulty, c.no_pre_mine, c.no_pre_mine_hour, c.latest_submission
             FROM challenge c
             LEFT JOIN work w ON w.challenge_id = c.challenge_id AND w.address = ",
        );
        qb.push_bind(address);
        qb.push(" WHERE c.latest_submission_dt >= ");
        qb.push_bind(threshold);
        qb.push(" AND (w.status IS NULL OR w.status IN (");
        {
            let mut separated = qb.separated(", ");
            for status in &allowed {
                separated.push_bind(*status);
            }
        }
        qb.push("))");
        qb.push(" ORDER BY c.latest_submission_dt ASC");

        let rows: Vec<ChallengeRow> = qb.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(Challenge::from).collect())
    }

    pub async fn get_challenges(
        &self,
        address: &str,
        statuses: &[WorkStatus],
    ) -> Result<Vec<Challenge>, MinerError> {
        self.query_challenges(address, statuses).await
    }

    pub async fn oldest_unsolved_challenge(&self, address: &str) -> Result<Option<Challenge>, MinerError> {
        let statuses: Vec<WorkStatus> = WorkStatus::all()
            .into_iter()
            .filter(|s| *s != WorkStatus::Validated)
            .collect();
        let mut challenges = self.query_challenges(address, &statuses).await?;
        Ok(if challenges.is_empty() {
            None
        } else {
            Some(challenges.remove(0))
        })
    }

    // -------------------------
    // work
    // -------------------------

    pub async fn add_work(&self, address: &str, challenge_id: &str, status: WorkStatus) -> Result<(), MinerError> {
        sqlx::query("INSERT OR IGNORE INTO work(address, challenge_id, status) VALUES (?, ?, ?)")
            .bind(address)
            .bind(challenge_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn update_work(&self, address: &str, challenge_id: &str, status: WorkStatus) -> Result<(), MinerError> {
        sqlx::query("UPDATE work SET status = ? WHERE address = ? AND challenge_id = ?")
            .bind(status.as_str())
            .bind(address)
            .bind(challenge_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn work_status(&self, address: &str, challenge_id: &str) -> Result<Option<WorkStatus>, MinerError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT status FROM work WHERE address = ? AND challenge_id = ?")
            .bind(address)
            .bind(challenge_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.and_then(|(s,)| WorkStatus::from_str(&s)))
    }

    // -------------------------
    // solution
    // -------------------------

    pub async fn add_solution_found(
        &self,
        address: &str,
        challenge_id: &str,
        solution: &Solution,
    ) -> Result<(), MinerError> {
        sqlx::query(
            "INSERT OR IGNORE INTO solution (address, challenge_id, nonce_hex, hash_hex, tries, status)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(address)
        .bind(challenge_id)
        .bind(&solution.nonce_hex)
        .bind(&solution.hash_hex)
        .bind(solution.tries as i64)
        .bind(SolutionStatus::Found.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_found_solution(
        &self,
        address: &str,
        challenge_id: &str,
    ) -> Result<Option<Solution>, MinerError> {
        let row: Option<SolutionRow> = sqlx::query_as(
            "SELECT nonce_hex, hash_hex, tries FROM solution
             WHERE address = ? AND challenge_id = ? AND status = ?",
        )
        .bind(address)
        .bind(challenge_id)
        .bind(SolutionStatus::Found.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Solution::from))
    }

    /// Transactionally moves both the `Work` row and the matching `Solution`
    /// row to their post-submission status.
    pub async fn update_solution_submission_result(
        &self,
        address: &str,
        challenge_id: &str,
        nonce_hex: &str,
        validated: bool,
    ) -> Result<(), MinerError> {
        let (work_status, solution_status) = if validated {
            (WorkStatus::Validated, SolutionStatus::Validated)
        } else {
            (WorkStatus::Invalid, SolutionStatus::Invalid)
        };

        let mut tx = self.pool.begin().await?;
        sqlx::query("UPDATE work SET status = ? WHERE address = ? AND challenge_id = ?")
            .bind(work_status.as_str())
            .bind(address)
            .bind(challenge_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE solution SET status = ? WHERE address = ? AND challenge_id = ? AND nonce_hex = ?",
        )
        .bind(solution_status.as_str())
        .bind(address)
        .bind(challenge_id)
        .bind(nonce_hex)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as CDuration;

    async fn open_temp_tracker() -> (Tracker, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.sqlite3");
        let tracker = Tracker::open(&path).await.unwrap();
        (tracker, dir)
    }

    fn challenge_expiring_in(seconds: i64) -> Challenge {
        Challenge {
            challenge_id: format!("chal-{}", seconds),
            day: 1,
            challenge_number: 1,
            difficulty: "0000ffff".to_string(),
            no_pre_mine: "seed".to_string(),
            no_pre_mine_hour: "123".to_string(),
            latest_submission: (Utc::now() + CDuration::seconds(seconds)).to_rfc3339(),
        }
    }

    #[tokio::test]
    async fn add_wallet_is_idempotent() {
        let (tracker, _dir) = open_temp_tracker().await;
        assert!(tracker.add_wallet("addr1").await.unwrap());
        assert!(!tracker.add_wallet("addr1").await.unwrap());
    }

    #[tokio::test]
    async fn add_challenge_is_idempotent() {
        let (tracker, _dir) = open_temp_tracker().await;
        let ch = challenge_expiring_in(3600);
        assert!(tracker.add_challenge(&ch).await.unwrap());
        assert!(!tracker.add_challenge(&ch).await.unwrap());
    }

    #[tokio::test]
    async fn worklist_excludes_challenges_inside_the_expiry_margin() {
        let (tracker, _dir) = open_temp_tracker().await;
        let expiring_soon = challenge_expiring_in(5);
        let valid = challenge_expiring_in(3600);
        tracker.add_challenge(&expiring_soon).await.unwrap();
        tracker.add_challenge(&valid).await.unwrap();

        let worklist = tracker
            .get_challenges("addr1", &[WorkStatus::Open, WorkStatus::Solving, WorkStatus::Invalid])
            .await
            .unwrap();

        let ids: Vec<&str> = worklist.iter().map(|c| c.challenge_id.as_str()).collect();
        assert!(!ids.contains(&expiring_soon.challenge_id.as_str()));
        assert!(ids.contains(&valid.challenge_id.as_str()));
    }

    #[tokio::test]
    async fn oldest_unsolved_challenge_skips_validated_work() {
        let (tracker, _dir) = open_temp_tracker().await;
        let ch = challenge_expiring_in(3600);
        tracker.add_challenge(&ch).await.unwrap();
        tracker.add_work("addr1", &ch.challenge_id, WorkStatus::Solving).await.unwrap();

        let found = tracker.oldest_unsolved_challenge("addr1").await.unwrap();
        assert_eq!(found.map(|c| c.challenge_id), Some(ch.challenge_id.clone()));

        tracker.update_work("addr1", &ch.challenge_id, WorkStatus::Validated).await.unwrap();
        let found_after = tracker.oldest_unsolved_challenge("addr1").await.unwrap();
        assert!(found_after.is_none());
    }

    #[tokio::test]
    async fn submission_result_transitions_work_and_solution_together() {
        let (tracker, _dir) = open_temp_tracker().await;
        let ch = challenge_expiring_in(3600);
        tracker.add_challenge(&ch).await.unwrap();
        tracker.add_work("addr1", &ch.challenge_id, WorkStatus::Solving).await.unwrap();

        let solution = Solution {
            nonce_hex: "0000000000000007".to_string(),
            hash_hex: "00".repeat(32),
            tries: 8,
        };
        tracker.add_solution_found("addr1", &ch.challenge_id, &solution).await.unwrap();
        assert!(tracker.get_found_solution("addr1", &ch.challenge_id).await.unwrap().is_some());

        tracker
            .update_solution_submission_result("addr1", &ch.challenge_id, &solution.nonce_hex, true)
            .await
            .unwrap();

        // A validated solution no longer shows up as "Found".
        assert!(tracker.get_found_solution("addr1", &ch.challenge_id).await.unwrap().is_none());
    }
}
