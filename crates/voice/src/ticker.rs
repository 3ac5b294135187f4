//! Driftkompensierter Taktgeber fuer den 20 ms RTP-Sendetakt
//!
//! Der k-te `tick()` nach `arm()` wird frei, sobald seit `arm()` mindestens
//! `(k - 1) * periode` vergangen ist. Liegt der Aufrufer mehr als eine
//! Periode zurueck, kehrt `tick()` sofort zurueck (gezaehlt als
//! "verschlafen") und holt den Rueckstand ueber die naechsten Ticks auf.
//! Damit konvergiert der mittlere Abstand langfristig exakt gegen die
//! Periode, unabhaengig von kurzfristigem Scheduling-Jitter.
//!
//! Die Zeitquelle steckt hinter [`Clock`], damit Tests simulierte Uhren
//! verwenden koennen.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Laengste einzelne Wartezeit, damit `disarm()` zeitnah greift
const MAX_SCHLAFDAUER: Duration = Duration::from_millis(5);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TickerError {
    #[error("Ticker ist nicht gestartet")]
    NotArmed,
    #[error("Ungueltige Periode: {0:?}")]
    InvalidPeriod(Duration),
}

/// Monotone Zeitquelle
pub trait Clock: Send + Sync {
    /// Zeit seit einem beliebigen, festen Ursprung
    fn now(&self) -> Duration;

    /// Blockiert den aufrufenden Thread
    fn sleep(&self, dauer: Duration);

    /// Ein Schritt aktiven Wartens
    fn spin(&self) {
        std::hint::spin_loop();
    }
}

/// Systemuhr auf Basis von [`Instant`]
#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    ursprung: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            ursprung: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.ursprung.elapsed()
    }

    fn sleep(&self, dauer: Duration) {
        std::thread::sleep(dauer);
    }
}

/// Warte-Strategie
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TickerKind {
    /// Aktives Warten, genau aber CPU-intensiv
    BusyWait,
    /// Blockierendes Schlafen
    #[default]
    Sleep,
}

/// Statistik eines Tickers
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickerStatistik {
    pub ticks: u64,
    pub overslept: u64,
}

#[derive(Debug, Default)]
struct Zustand {
    start: Duration,
    periode: Duration,
    ticks: u64,
    overslept: u64,
}

/// Taktgeber eines Sendepfads
pub struct Ticker {
    kind: TickerKind,
    clock: Arc<dyn Clock>,
    armed: AtomicBool,
    zustand: Mutex<Zustand>,
}

impl std::fmt::Debug for Ticker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ticker")
            .field("kind", &self.kind)
            .field("armed", &self.is_armed())
            .finish()
    }
}

impl Ticker {
    /// Ticker auf der Systemuhr
    pub fn neu(kind: TickerKind) -> Self {
        Self::mit_uhr(kind, Arc::new(SystemClock::new()))
    }

    pub fn mit_uhr(kind: TickerKind, clock: Arc<dyn Clock>) -> Self {
        Self {
            kind,
            clock,
            armed: AtomicBool::new(false),
            zustand: Mutex::new(Zustand::default()),
        }
    }

    pub fn kind(&self) -> TickerKind {
        self.kind
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    /// Startet den Takt mit der gegebenen Periode
    pub fn arm(&self, periode: Duration) -> Result<(), TickerError> {
        if periode.is_zero() {
            return Err(TickerError::InvalidPeriod(periode));
        }
        *self.zustand.lock() = Zustand {
            start: self.clock.now(),
            periode,
            ticks: 0,
            overslept: 0,
        };
        self.armed.store(true, Ordering::Release);
        tracing::debug!(periode_ms = periode.as_millis() as u64, kind = ?self.kind, "Ticker gestartet");
        Ok(())
    }

    /// Stoppt den Takt; darf parallel zu einem laufenden `tick()` aufgerufen
    /// werden
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }

    /// Wartet auf den naechsten Takt
    pub fn tick(&self) -> Result<(), TickerError> {
        if !self.is_armed() {
            return Err(TickerError::NotArmed);
        }

        let ziel = {
            let mut z = self.zustand.lock();
            z.ticks += 1;
            let vorher = versatz(z.periode, z.ticks - 1);
            let verspaetet = z.start + vorher + z.periode * 2;
            let jetzt = self.clock.now();
            if jetzt > verspaetet {
                z.overslept += 1;
                tracing::trace!(
                    tick = z.ticks,
                    rueckstand_us = (jetzt - verspaetet).as_micros() as u64,
                    "Ticker verschlafen"
                );
                return Ok(());
            }
            z.start + vorher
        };

        loop {
            let jetzt = self.clock.now();
            if jetzt >= ziel {
                return Ok(());
            }
            if !self.is_armed() {
                return Err(TickerError::NotArmed);
            }
            match self.kind {
                TickerKind::Sleep => self.clock.sleep((ziel - jetzt).min(MAX_SCHLAFDAUER)),
                TickerKind::BusyWait => self.clock.spin(),
            }
        }
    }

    pub fn statistik(&self) -> TickerStatistik {
        let z = self.zustand.lock();
        TickerStatistik {
            ticks: z.ticks,
            overslept: z.overslept,
        }
    }
}

/// `periode * ticks` ohne Abschneiden des Tick-Zaehlers
fn versatz(periode: Duration, ticks: u64) -> Duration {
    let nanos = periode.as_nanos().saturating_mul(ticks as u128);
    let sekunden = u64::try_from(nanos / 1_000_000_000).unwrap_or(u64::MAX);
    Duration::new(sekunden, (nanos % 1_000_000_000) as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Simulierte Uhr: Schlafen ueberschiesst um bis zu `jitter`
    struct SimUhr {
        jetzt: Mutex<Duration>,
        jitter: Duration,
        schritt: Mutex<u64>,
    }

    impl SimUhr {
        fn neu(jitter: Duration) -> Arc<Self> {
            Arc::new(Self {
                jetzt: Mutex::new(Duration::ZERO),
                jitter,
                schritt: Mutex::new(0),
            })
        }

        fn vorstellen(&self, dauer: Duration) {
            *self.jetzt.lock() += dauer;
        }

        /// Deterministischer Anteil in 0..=jitter
        fn streuung(&self) -> Duration {
            let mut s = self.schritt.lock();
            *s = s.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let anteil = (*s >> 33) % 1001;
            self.jitter * anteil as u32 / 1000
        }
    }

    impl Clock for SimUhr {
        fn now(&self) -> Duration {
            *self.jetzt.lock()
        }

        fn sleep(&self, dauer: Duration) {
            let streuung = self.streuung();
            self.vorstellen(dauer + streuung);
        }

        fn spin(&self) {
            self.vorstellen(Duration::from_micros(50));
        }
    }

    const PERIODE: Duration = Duration::from_millis(20);

    #[test]
    fn tick_ohne_arm_schlaegt_fehl() {
        let ticker = Ticker::neu(TickerKind::Sleep);
        assert_eq!(ticker.tick(), Err(TickerError::NotArmed));
    }

    #[test]
    fn null_periode_wird_abgelehnt() {
        let ticker = Ticker::neu(TickerKind::Sleep);
        assert_eq!(
            ticker.arm(Duration::ZERO),
            Err(TickerError::InvalidPeriod(Duration::ZERO))
        );
        assert!(!ticker.is_armed());
    }

    #[test]
    fn mittlerer_abstand_konvergiert() {
        let jitter = Duration::from_millis(4);
        let uhr = SimUhr::neu(jitter);
        let ticker = Ticker::mit_uhr(TickerKind::Sleep, uhr.clone());
        ticker.arm(PERIODE).unwrap();

        let n = 500u32;
        let mut zeiten = Vec::with_capacity(n as usize);
        for _ in 0..n {
            ticker.tick().unwrap();
            zeiten.push(uhr.now());
            // Arbeit zwischen den Ticks, ebenfalls gestreut
            let arbeit = Duration::from_millis(3) + uhr.streuung();
            uhr.vorstellen(arbeit);
        }

        let gesamt = *zeiten.last().unwrap() - zeiten[0];
        let mittel = gesamt / (n - 1);
        let fehler = if mittel > PERIODE {
            mittel - PERIODE
        } else {
            PERIODE - mittel
        };
        assert!(
            fehler <= jitter / (n - 1),
            "Mittel {mittel:?}, Fehler {fehler:?}"
        );
        assert_eq!(ticker.statistik().overslept, 0);
        assert_eq!(ticker.statistik().ticks, n as u64);
    }

    #[test]
    fn busy_wait_trifft_takt() {
        let uhr = SimUhr::neu(Duration::ZERO);
        let ticker = Ticker::mit_uhr(TickerKind::BusyWait, uhr.clone());
        ticker.arm(PERIODE).unwrap();
        for k in 0..50u32 {
            ticker.tick().unwrap();
            let soll = PERIODE * k;
            let ist = uhr.now();
            assert!(ist >= soll && ist - soll <= Duration::from_micros(50));
        }
    }

    #[test]
    fn verspaetung_wird_aufgeholt() {
        let uhr = SimUhr::neu(Duration::ZERO);
        let ticker = Ticker::mit_uhr(TickerKind::Sleep, uhr.clone());
        ticker.arm(PERIODE).unwrap();

        for _ in 0..10 {
            ticker.tick().unwrap();
        }
        // Thread haengt 100 ms
        uhr.vorstellen(Duration::from_millis(100));
        let vorher = uhr.now();
        for _ in 0..4 {
            ticker.tick().unwrap();
        }
        assert_eq!(uhr.now(), vorher, "Rueckstand ohne Warten aufholen");
        assert!(ticker.statistik().overslept >= 1);

        // Danach wieder im Takt: Tick 20 bei 19 Perioden
        for _ in 0..6 {
            ticker.tick().unwrap();
        }
        assert_eq!(uhr.now(), PERIODE * 19);
    }

    #[test]
    fn versatz_ueber_u32_grenze() {
        let ticks = (1u64 << 32) + 1;
        assert_eq!(versatz(PERIODE, ticks), Duration::from_millis(20 * ticks));
    }

    #[test]
    fn takt_nach_u32_ticks_bleibt_puenktlich() {
        let uhr = SimUhr::neu(Duration::ZERO);
        let ticker = Ticker::mit_uhr(TickerKind::Sleep, uhr.clone());
        ticker.arm(PERIODE).unwrap();

        let ticks = 1u64 << 32;
        ticker.zustand.lock().ticks = ticks;
        let ziel = Duration::from_millis(20 * ticks);
        uhr.vorstellen(ziel - Duration::from_millis(1));

        ticker.tick().unwrap();
        assert!(uhr.now() >= ziel);
        assert_eq!(ticker.statistik().overslept, 0);
    }

    #[test]
    fn disarm_aus_anderem_thread() {
        let ticker = Arc::new(Ticker::neu(TickerKind::Sleep));
        ticker.arm(PERIODE).unwrap();

        let t = ticker.clone();
        let handle = std::thread::spawn(move || loop {
            if let Err(e) = t.tick() {
                return e;
            }
        });

        std::thread::sleep(Duration::from_millis(70));
        ticker.disarm();
        assert_eq!(handle.join().unwrap(), TickerError::NotArmed);
        assert_eq!(ticker.tick(), Err(TickerError::NotArmed));
    }
}
